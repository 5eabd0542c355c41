//! Streaming CSV transform that prepends the derived `id` column.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use csv::{QuoteStyle, StringRecord};
use thiserror::Error;
use ytr_core::{OutputRow, ID_COLUMN};

use crate::keys::KeyDeriver;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("custom key field {field:?} is not a column of {path}")]
    MissingKeyField { field: String, path: PathBuf },
    #[error("opening {path} for append: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("writing {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("flushing {path}: {source}")]
    Flush {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformOutcome {
    pub rows: u64,
    pub header_written: bool,
}

/// Column names with every repeated name suffixed by `_<index>`.
pub fn disambiguate_header<'h>(header: impl IntoIterator<Item = &'h str>) -> Vec<String> {
    let names: Vec<&str> = header.into_iter().collect();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for name in &names {
        *counts.entry(*name).or_default() += 1;
    }
    names
        .iter()
        .enumerate()
        .map(|(index, name)| {
            if counts[name] > 1 {
                format!("{name}_{index}")
            } else {
                name.to_string()
            }
        })
        .collect()
}

/// Key `record` on the source header names and label its values with `columns`.
pub fn transform_record(
    header: &StringRecord,
    columns: &[String],
    record: &StringRecord,
    deriver: &KeyDeriver,
) -> OutputRow {
    let id = deriver.derive_id(header.iter().zip(record.iter()));
    OutputRow::new(id, columns.iter().map(String::as_str).zip(record.iter()))
}

fn needs_header(destination: &Path) -> bool {
    std::fs::metadata(destination)
        .map(|meta| meta.len() == 0)
        .unwrap_or(true)
}

/// Append the keyed rows of `source` to `destination`, one record at a time.
///
/// The augmented header is written only when `destination` is missing or empty.
/// Repeated column names are suffixed in the output, but key fields are matched
/// against the names as they appear in `source`.
/// A record whose width differs from the header aborts the transform; rows that
/// were already appended stay in place.
pub fn transform_file(
    source: &Path,
    destination: &Path,
    deriver: &KeyDeriver,
) -> Result<TransformOutcome, TransformError> {
    let read_err = |source_err| TransformError::Read {
        path: source.to_path_buf(),
        source: source_err,
    };
    let write_err = |source_err| TransformError::Write {
        path: destination.to_path_buf(),
        source: source_err,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(source)
        .map_err(read_err)?;
    let header = reader.headers().map_err(read_err)?.clone();
    if header.is_empty() {
        return Ok(TransformOutcome::default());
    }

    let columns = disambiguate_header(header.iter());
    if let Some(custom) = deriver.custom_fields() {
        let missing = custom
            .iter()
            .find(|field| !header.iter().any(|name| name == field.as_str()));
        if let Some(field) = missing {
            return Err(TransformError::MissingKeyField {
                field: field.clone(),
                path: source.to_path_buf(),
            });
        }
    }

    let header_written = needs_header(destination);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(destination)
        .map_err(|source_err| TransformError::Open {
            path: destination.to_path_buf(),
            source: source_err,
        })?;
    let mut writer = csv::WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(file);

    if header_written {
        writer
            .write_record(std::iter::once(ID_COLUMN).chain(columns.iter().map(String::as_str)))
            .map_err(write_err)?;
    }

    let mut record = StringRecord::new();
    let mut rows = 0u64;
    while reader.read_record(&mut record).map_err(read_err)? {
        let row = transform_record(&header, &columns, &record, deriver);
        writer.write_record(row.values()).map_err(write_err)?;
        rows += 1;
    }

    writer.flush().map_err(|source_err| TransformError::Flush {
        path: destination.to_path_buf(),
        source: source_err,
    })?;

    Ok(TransformOutcome {
        rows,
        header_written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use ytr_core::KeyFieldVocabulary;

    fn deriver() -> KeyDeriver {
        KeyDeriver::new(KeyFieldVocabulary::default(), None)
    }

    fn id_of(key: &str) -> String {
        format!("{:x}", md5::compute(key))
    }

    #[test]
    fn two_sources_share_one_header_in_arrival_order() {
        let dir = tempdir().expect("tempdir");
        let first = dir.path().join("a.csv");
        let second = dir.path().join("b.csv");
        let out = dir.path().join("channel_basic_a2.csv");
        std::fs::write(&first, "date,video_id,views\n20230101,v1,10\n20230101,v2,5\n").expect("write");
        std::fs::write(&second, "date,video_id,views\n20230102,v1,7\n").expect("write");

        let a = transform_file(&first, &out, &deriver()).expect("first");
        let b = transform_file(&second, &out, &deriver()).expect("second");

        assert_eq!(a, TransformOutcome { rows: 2, header_written: true });
        assert_eq!(b, TransformOutcome { rows: 1, header_written: false });

        let text = std::fs::read_to_string(&out).expect("read");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], r#""id","date","video_id","views""#);
        assert_eq!(
            lines[1],
            format!(r#""{}","20230101","v1","10""#, id_of(" 20230101 v1"))
        );
        assert!(lines[2].contains(r#""v2""#));
        assert_eq!(
            lines[3],
            format!(r#""{}","20230102","v1","7""#, id_of(" 20230102 v1"))
        );
        assert_eq!(text.matches("\"id\"").count(), 1);
    }

    #[test]
    fn ragged_record_fails_but_keeps_earlier_rows() {
        let dir = tempdir().expect("tempdir");
        let src = dir.path().join("bad.csv");
        let out = dir.path().join("out.csv");
        std::fs::write(&src, "date,views\n20230101,1\n20230102\n20230103,3\n").expect("write");

        let err = transform_file(&src, &out, &deriver()).expect_err("ragged row");
        assert!(matches!(err, TransformError::Read { .. }));

        let text = std::fs::read_to_string(&out).expect("read");
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("20230101"));
        assert!(!text.contains("20230103"));
    }

    #[test]
    fn duplicate_columns_are_suffixed_with_their_index() {
        assert_eq!(
            disambiguate_header(["date", "views", "views", "country_code"]),
            vec!["date", "views_1", "views_2", "country_code"]
        );

        let dir = tempdir().expect("tempdir");
        let src = dir.path().join("dup.csv");
        let out = dir.path().join("out.csv");
        std::fs::write(&src, "date,views,views\n20230101,1,2\n").expect("write");
        transform_file(&src, &out, &deriver()).expect("transform");
        let header = std::fs::read_to_string(&out).expect("read");
        assert!(header.starts_with(r#""id","date","views_1","views_2""#));
    }

    #[test]
    fn unknown_custom_key_field_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let src = dir.path().join("src.csv");
        let out = dir.path().join("out.csv");
        std::fs::write(&src, "date,views\n20230101,1\n").expect("write");

        let custom = KeyDeriver::new(KeyFieldVocabulary::default(), Some(vec!["video_id".into()]));
        let err = transform_file(&src, &out, &custom).expect_err("missing field");
        assert!(matches!(err, TransformError::MissingKeyField { ref field, .. } if field == "video_id"));
        assert!(!out.exists());
    }

    #[test]
    fn custom_key_may_name_a_repeated_column() {
        let dir = tempdir().expect("tempdir");
        let src = dir.path().join("dup.csv");
        let out = dir.path().join("out.csv");
        std::fs::write(&src, "date,views,views\n20230101,1,2\n").expect("write");

        let custom = KeyDeriver::new(KeyFieldVocabulary::default(), Some(vec!["views".into()]));
        let outcome = transform_file(&src, &out, &custom).expect("transform");
        assert_eq!(outcome.rows, 1);

        let text = std::fs::read_to_string(&out).expect("read");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], r#""id","date","views_1","views_2""#);
        assert_eq!(lines[1], format!(r#""{}","20230101","1","2""#, id_of(" 1 2")));
    }

    #[test]
    fn custom_key_must_match_a_source_column_name() {
        let dir = tempdir().expect("tempdir");
        let src = dir.path().join("dup.csv");
        let out = dir.path().join("out.csv");
        std::fs::write(&src, "date,views\n20230101,1\n").expect("write");

        let custom = KeyDeriver::new(KeyFieldVocabulary::default(), Some(vec!["views_1".into()]));
        let err = transform_file(&src, &out, &custom).expect_err("missing field");
        assert!(matches!(err, TransformError::MissingKeyField { ref field, .. } if field == "views_1"));
    }

    #[test]
    fn repeated_id_columns_keep_their_suffix_classification() {
        let columns = disambiguate_header(["video_id", "video_id", "views"]);
        let header = StringRecord::from(vec!["video_id", "video_id", "views"]);
        let record = StringRecord::from(vec!["5", "6", "3"]);
        let row = transform_record(&header, &columns, &record, &deriver());
        assert_eq!(row.values().collect::<Vec<_>>(), [id_of(" 5 6").as_str(), "5", "6", "3"]);
    }

    #[test]
    fn empty_destination_still_gets_a_header() {
        let dir = tempdir().expect("tempdir");
        let src = dir.path().join("src.csv");
        let out = dir.path().join("out.csv");
        std::fs::write(&src, "date,views\n20230101,1\n").expect("write");
        std::fs::write(&out, "").expect("touch");

        let outcome = transform_file(&src, &out, &deriver()).expect("transform");
        assert!(outcome.header_written);
    }

    #[test]
    fn empty_source_writes_nothing() {
        let dir = tempdir().expect("tempdir");
        let src = dir.path().join("empty.csv");
        let out = dir.path().join("out.csv");
        std::fs::write(&src, "").expect("write");

        let outcome = transform_file(&src, &out, &deriver()).expect("transform");
        assert_eq!(outcome, TransformOutcome::default());
        assert!(!out.exists());
    }

    #[test]
    fn transformed_row_carries_id_first() {
        let header = StringRecord::from(vec!["video_id", "views"]);
        let columns = disambiguate_header(header.iter());
        let record = StringRecord::from(vec!["v1", "3"]);
        let row = transform_record(&header, &columns, &record, &deriver());
        assert_eq!(row.values().collect::<Vec<_>>(), [id_of(" v1").as_str(), "v1", "3"]);
    }
}
