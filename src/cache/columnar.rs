//! Parquet encoding for [`Table`] values.
//!
//! Tables map one-to-one onto an Arrow schema of non-nullable columns and are
//! written as a single record batch. Compression is Parquet's own column
//! compression rather than an outer zstd frame, so the files stay readable by
//! any Parquet reader.

use std::fs::File;
use std::sync::Arc;

use arrow_array::{Array, ArrayRef, BooleanArray, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{ArrowError, DataType, Field, Schema, SchemaRef};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::errors::ParquetError;
use parquet::file::properties::WriterProperties;
use thiserror::Error;

use crate::value::{Column, ColumnData, Table, TableError};

#[derive(Error, Debug)]
pub enum ColumnarError {
    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Unsupported column type {data_type} for column '{name}'")]
    UnsupportedType { name: String, data_type: DataType },

    #[error("Table without columns has no columnar form")]
    NoColumns,

    #[error(transparent)]
    Table(#[from] TableError),
}

/// Whether a table can be written in columnar form.
pub fn supports(table: &Table) -> bool {
    table.num_columns() > 0
}

/// Write `table` as Parquet into `file`. `zstd_level` enables column compression.
pub fn write_table(file: File, table: &Table, zstd_level: Option<i32>) -> Result<(), ColumnarError> {
    let batch = to_record_batch(table)?;

    let compression = match zstd_level {
        Some(level) => Compression::ZSTD(ZstdLevel::try_new(level)?),
        None => Compression::UNCOMPRESSED,
    };
    let props = WriterProperties::builder().set_compression(compression).build();

    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

/// Read a table previously written by [`write_table`].
pub fn read_table(file: File) -> Result<Table, ColumnarError> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let reader = builder.build()?;

    let mut columns = empty_columns(&schema)?;
    for batch in reader {
        let batch = batch?;
        for (column, array) in columns.iter_mut().zip(batch.columns()) {
            append_array(column, array.as_ref())?;
        }
    }
    Ok(Table::new(columns)?)
}

fn to_record_batch(table: &Table) -> Result<RecordBatch, ColumnarError> {
    if !supports(table) {
        return Err(ColumnarError::NoColumns);
    }

    let mut fields = Vec::with_capacity(table.num_columns());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.num_columns());
    for column in table.columns() {
        let (data_type, array): (DataType, ArrayRef) = match &column.data {
            ColumnData::Int64(v) => (DataType::Int64, Arc::new(Int64Array::from(v.clone()))),
            ColumnData::Float64(v) => (DataType::Float64, Arc::new(Float64Array::from(v.clone()))),
            ColumnData::Utf8(v) => (DataType::Utf8, Arc::new(StringArray::from(v.clone()))),
            ColumnData::Boolean(v) => (DataType::Boolean, Arc::new(BooleanArray::from(v.clone()))),
        };
        fields.push(Field::new(column.name.clone(), data_type, false));
        arrays.push(array);
    }

    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

fn empty_columns(schema: &SchemaRef) -> Result<Vec<Column>, ColumnarError> {
    schema
        .fields()
        .iter()
        .map(|field| {
            let data = match field.data_type() {
                DataType::Int64 => ColumnData::Int64(Vec::new()),
                DataType::Float64 => ColumnData::Float64(Vec::new()),
                DataType::Utf8 => ColumnData::Utf8(Vec::new()),
                DataType::Boolean => ColumnData::Boolean(Vec::new()),
                other => {
                    return Err(ColumnarError::UnsupportedType {
                        name: field.name().clone(),
                        data_type: other.clone(),
                    })
                }
            };
            Ok(Column::new(field.name().clone(), data))
        })
        .collect()
}

fn append_array(column: &mut Column, array: &dyn Array) -> Result<(), ColumnarError> {
    let name = column.name.clone();
    let mismatch = || ColumnarError::UnsupportedType {
        name: name.clone(),
        data_type: array.data_type().clone(),
    };

    match &mut column.data {
        ColumnData::Int64(out) => {
            let values = array.as_any().downcast_ref::<Int64Array>().ok_or_else(mismatch)?;
            out.extend_from_slice(values.values());
        }
        ColumnData::Float64(out) => {
            let values = array.as_any().downcast_ref::<Float64Array>().ok_or_else(mismatch)?;
            out.extend_from_slice(values.values());
        }
        ColumnData::Utf8(out) => {
            let values = array.as_any().downcast_ref::<StringArray>().ok_or_else(mismatch)?;
            out.extend((0..values.len()).map(|i| values.value(i).to_string()));
        }
        ColumnData::Boolean(out) => {
            let values = array.as_any().downcast_ref::<BooleanArray>().ok_or_else(mismatch)?;
            out.extend((0..values.len()).map(|i| values.value(i)));
        }
    }
    Ok(())
}
