//! schema
//! ------
//! Resolves the ordered column list for a cached file without scanning it,
//! and opens files as `LazyFrame`s for the pipeline. CSV and TSV stay lazy
//! end to end; JSON and Excel have no lazy reader so they are read eagerly
//! and handed to the lazy engine afterwards.

use std::num::NonZero;
use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use polars::prelude::{
    DataFrame, IntoLazy, JsonFormat, JsonReader, LazyCsvReader, LazyFileListReader, LazyFrame,
    NamedFrom, SerReader, Series,
};
use polars_utils::plpath::PlPath;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::format::{self, TabularFormat};

/// Ordered real column identifiers plus their inferred types, as resolved
/// from a lightweight read of the file head. The separator detected during
/// resolution rides along so delimited files are probed exactly once per
/// resource; non-delimited formats carry the comma default.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub columns: Vec<String>,
    pub dtypes: Vec<String>,
    pub separator: u8,
}

impl TableSchema {
    /// `name: dtype` pairs in file order, for metadata output.
    pub fn describe(&self) -> Vec<String> {
        self.columns
            .iter()
            .zip(&self.dtypes)
            .map(|(c, d)| format!("{c}: {d}"))
            .collect()
    }
}

pub fn resolve_schema(
    path: &Path,
    fmt: TabularFormat,
    resource_id: u64,
) -> EngineResult<TableSchema> {
    let schema = match fmt {
        TabularFormat::Csv | TabularFormat::Tsv => csv_schema(path, fmt, resource_id)?,
        TabularFormat::Json => {
            let df = read_json(path, fmt, resource_id)?;
            schema_from_df(&df)
        }
        TabularFormat::Xlsx => {
            let df = read_excel(path, resource_id)?;
            schema_from_df(&df)
        }
    };
    debug!(target: "tabq::schema", resource_id, columns = schema.columns.len(),
        format = %fmt, "schema resolved");
    Ok(schema)
}

/// Open a cached file as a `LazyFrame`. `separator` only matters for the
/// delimited formats.
pub fn open_lazy(
    path: &Path,
    fmt: TabularFormat,
    separator: u8,
    resource_id: u64,
) -> EngineResult<LazyFrame> {
    match fmt {
        TabularFormat::Csv | TabularFormat::Tsv => {
            let lf = LazyCsvReader::new(PlPath::new(&path.to_string_lossy()))
                .with_separator(separator)
                .with_infer_schema_length(None)
                .with_try_parse_dates(true)
                .finish()
                .map_err(|e| {
                    EngineError::schema_read(resource_id, fmt.to_string(), e.to_string())
                })?;
            Ok(lf)
        }
        TabularFormat::Json => Ok(read_json(path, fmt, resource_id)?.lazy()),
        TabularFormat::Xlsx => Ok(read_excel(path, resource_id)?.lazy()),
    }
}

fn csv_schema(path: &Path, fmt: TabularFormat, resource_id: u64) -> EngineResult<TableSchema> {
    let separator = format::detect_separator(path).map_err(|e| {
        EngineError::schema_read(resource_id, fmt.to_string(), e.to_string())
    })?;
    // one data row is enough for header names and a first-pass dtype
    let mut lf = LazyCsvReader::new(PlPath::new(&path.to_string_lossy()))
        .with_separator(separator)
        .with_n_rows(Some(1))
        .finish()
        .map_err(|e| EngineError::schema_read(resource_id, fmt.to_string(), e.to_string()))?;
    let schema = lf
        .collect_schema()
        .map_err(|e| EngineError::schema_read(resource_id, fmt.to_string(), e.to_string()))?;
    let mut columns = Vec::with_capacity(schema.len());
    let mut dtypes = Vec::with_capacity(schema.len());
    for (name, dtype) in schema.iter() {
        columns.push(name.to_string());
        dtypes.push(dtype.to_string());
    }
    Ok(TableSchema { columns, dtypes, separator })
}

fn schema_from_df(df: &DataFrame) -> TableSchema {
    let columns: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
    let dtypes: Vec<String> = df.get_columns().iter().map(|c| c.dtype().to_string()).collect();
    TableSchema { columns, dtypes, separator: b',' }
}

fn read_json(path: &Path, fmt: TabularFormat, resource_id: u64) -> EngineResult<DataFrame> {
    let file = std::fs::File::open(path).map_err(|e| {
        EngineError::schema_read(resource_id, fmt.to_string(), e.to_string())
    })?;
    JsonReader::new(file)
        .with_json_format(JsonFormat::Json)
        .infer_schema_len(NonZero::new(10_000))
        .finish()
        .map_err(|e| EngineError::schema_read(resource_id, fmt.to_string(), e.to_string()))
}

/// Eager Excel read of the first worksheet. Headers come from the first
/// row; unnamed header cells become `column_{i}`. Column types are inferred
/// over the data cells with strings winning over numerics.
fn read_excel(path: &Path, resource_id: u64) -> EngineResult<DataFrame> {
    let fmt = TabularFormat::Xlsx.to_string();
    let schema_err =
        |msg: String| EngineError::schema_read(resource_id, fmt.clone(), msg);

    let mut workbook = open_workbook_auto(path).map_err(|e| schema_err(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| schema_err("workbook has no worksheets".to_string()))?
        .map_err(|e| schema_err(e.to_string()))?;

    let rows: Vec<Vec<Data>> = range.rows().map(|r| r.to_vec()).collect();
    if rows.is_empty() {
        return Err(schema_err("first worksheet is empty".to_string()));
    }

    let headers: Vec<String> = rows[0]
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let h = calamine::DataType::as_string(c).unwrap_or_default();
            if h.is_empty() {
                format!("column_{}", i + 1)
            } else {
                h
            }
        })
        .collect();

    let mut cols = Vec::with_capacity(headers.len());
    for (col_idx, header) in headers.iter().enumerate() {
        let cells: Vec<Option<&Data>> = rows[1..].iter().map(|r| r.get(col_idx)).collect();
        cols.push(excel_column(header, &cells));
    }
    DataFrame::new(cols).map_err(|e| schema_err(e.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExcelColType {
    Utf8,
    Int64,
    Float64,
    Boolean,
}

fn excel_infer_column_type(cells: &[Option<&Data>]) -> ExcelColType {
    use calamine::DataType as CalamineTrait;
    let mut has_float = false;
    let mut has_int = false;
    let mut has_bool = false;
    for cell in cells.iter().flatten() {
        if CalamineTrait::is_string(*cell) {
            return ExcelColType::Utf8;
        }
        if CalamineTrait::is_float(*cell) {
            has_float = true;
        }
        if CalamineTrait::is_int(*cell) {
            has_int = true;
        }
        if CalamineTrait::is_bool(*cell) {
            has_bool = true;
        }
    }
    if has_float {
        // whole-number float columns read better as integers
        let all_whole = cells.iter().flatten().all(|cell| {
            calamine::DataType::as_f64(*cell)
                .map(|f| f.is_finite() && (f - f.trunc()).abs() < 1e-10)
                .unwrap_or(true)
        });
        if all_whole {
            ExcelColType::Int64
        } else {
            ExcelColType::Float64
        }
    } else if has_int {
        ExcelColType::Int64
    } else if has_bool {
        ExcelColType::Boolean
    } else {
        ExcelColType::Utf8
    }
}

fn excel_column(name: &str, cells: &[Option<&Data>]) -> polars::prelude::Column {
    use calamine::DataType as CalamineTrait;
    match excel_infer_column_type(cells) {
        ExcelColType::Int64 => {
            let v: Vec<Option<i64>> =
                cells.iter().map(|c| c.and_then(|cell| cell.as_i64())).collect();
            Series::new(name.into(), v).into()
        }
        ExcelColType::Float64 => {
            let v: Vec<Option<f64>> =
                cells.iter().map(|c| c.and_then(|cell| cell.as_f64())).collect();
            Series::new(name.into(), v).into()
        }
        ExcelColType::Boolean => {
            let v: Vec<Option<bool>> =
                cells.iter().map(|c| c.and_then(|cell| cell.get_bool())).collect();
            Series::new(name.into(), v).into()
        }
        ExcelColType::Utf8 => {
            let v: Vec<Option<String>> = cells
                .iter()
                .map(|c| {
                    c.and_then(|cell| {
                        if CalamineTrait::is_empty(cell) {
                            None
                        } else {
                            cell.as_string()
                        }
                    })
                })
                .collect();
            Series::new(name.into(), v).into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let p = dir.path().join(name);
        let mut f = std::fs::File::create(&p).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        p
    }

    #[test]
    fn csv_schema_uses_detected_separator() {
        let tmp = tempfile::tempdir().unwrap();
        let p = write_file(&tmp, "r.csv", "name;region;amount\na;north;100\n");
        let schema = resolve_schema(&p, TabularFormat::Csv, 1).unwrap();
        assert_eq!(schema.columns, vec!["name", "region", "amount"]);
        // the detected separator is carried for later opens
        assert_eq!(schema.separator, b';');
    }

    #[test]
    fn tsv_schema() {
        let tmp = tempfile::tempdir().unwrap();
        let p = write_file(&tmp, "r.tsv", "a\tb\n1\t2\n");
        let schema = resolve_schema(&p, TabularFormat::Tsv, 1).unwrap();
        assert_eq!(schema.columns, vec!["a", "b"]);
    }

    #[test]
    fn json_schema_from_array_of_objects() {
        let tmp = tempfile::tempdir().unwrap();
        let p = write_file(&tmp, "r.json", r#"[{"x": 1, "y": "a"}, {"x": 2, "y": "b"}]"#);
        let schema = resolve_schema(&p, TabularFormat::Json, 1).unwrap();
        assert_eq!(schema.columns.len(), 2);
        assert!(schema.columns.contains(&"x".to_string()));
    }

    #[test]
    fn open_lazy_reads_csv_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let p = write_file(&tmp, "r.csv", "a,b\n1,2\n3,4\n");
        let lf = open_lazy(&p, TabularFormat::Csv, b',', 1).unwrap();
        let df = lf.collect().unwrap();
        assert_eq!(df.height(), 2);
    }

    #[test]
    fn describe_pairs_names_and_types() {
        let s = TableSchema {
            columns: vec!["a".to_string(), "b".to_string()],
            dtypes: vec!["i64".to_string(), "str".to_string()],
            separator: b',',
        };
        assert_eq!(s.describe(), vec!["a: i64", "b: str"]);
    }

    #[test]
    fn missing_file_is_schema_read_error() {
        let err = resolve_schema(Path::new("/nonexistent/file.csv"), TabularFormat::Csv, 9)
            .unwrap_err();
        assert_eq!(err.kind(), "schema_read_error");
    }
}
