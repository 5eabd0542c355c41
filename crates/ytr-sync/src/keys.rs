//! Row identity: dimension/metric field classification and the MD5 row id.

use ytr_core::{CustomKeyOverrides, KeyFieldVocabulary, ReportCategory};

/// True when `value` reads as a number. Blank cells count as numeric (an absent metric).
pub fn is_numeric_literal(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || trimmed.parse::<f64>().is_ok_and(f64::is_finite)
}

/// Per-category classifier and id generator.
#[derive(Debug, Clone)]
pub struct KeyDeriver {
    vocabulary: KeyFieldVocabulary,
    custom: Option<Vec<String>>,
}

impl KeyDeriver {
    pub fn new(vocabulary: KeyFieldVocabulary, custom: Option<Vec<String>>) -> Self {
        Self { vocabulary, custom }
    }

    pub fn for_category(
        category: &ReportCategory,
        vocabulary: &KeyFieldVocabulary,
        overrides: &CustomKeyOverrides,
    ) -> Self {
        Self::new(vocabulary.clone(), overrides.get(category).map(<[String]>::to_vec))
    }

    pub fn custom_fields(&self) -> Option<&[String]> {
        self.custom.as_deref()
    }

    pub fn is_key_field(&self, name: &str, value: &str) -> bool {
        if let Some(custom) = &self.custom {
            return custom.iter().any(|field| field == name);
        }
        if !is_numeric_literal(value) || name == self.vocabulary.date_field {
            return true;
        }
        name.rsplit('_')
            .next()
            .is_some_and(|segment| self.vocabulary.has_suffix(segment))
    }

    /// Space-prefixed concatenation of key field values in column order.
    pub fn key_string<'r>(&self, fields: impl IntoIterator<Item = (&'r str, &'r str)>) -> String {
        fields
            .into_iter()
            .filter(|(name, value)| self.is_key_field(name, value))
            .fold(String::new(), |mut acc, (_, value)| {
                acc.push(' ');
                acc.push_str(value);
                acc
            })
    }

    pub fn derive_id<'r>(&self, fields: impl IntoIterator<Item = (&'r str, &'r str)>) -> String {
        format!("{:x}", md5::compute(self.key_string(fields)))
    }
}

/// Classify the fields of one row for `category` and return its lowercase hex id.
pub fn classify_and_hash<'r>(
    row: impl IntoIterator<Item = (&'r str, &'r str)>,
    category: &ReportCategory,
    vocabulary: &KeyFieldVocabulary,
    overrides: &CustomKeyOverrides,
) -> String {
    KeyDeriver::for_category(category, vocabulary, overrides).derive_id(row)
}
