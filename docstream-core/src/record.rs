//! Record and collection descriptor traits.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::Dictionary;

/// A typed value stored as one document.
///
/// The identifier must serialize under the `key` field. It is stripped from
/// the stored payload and restored from the document path on read.
pub trait Record: Serialize + DeserializeOwned + Send + 'static {
    fn key(&self) -> &str;
}

/// Binds a record type to its canonical top-level collection name.
pub trait Collection {
    const NAME: &'static str;
}

/// An untyped record: a key plus whatever fields the document holds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Document {
    pub key: String,
    #[serde(flatten)]
    pub fields: Dictionary,
}

impl Document {
    pub fn new(key: impl Into<String>, fields: Dictionary) -> Self {
        Self {
            key: key.into(),
            fields,
        }
    }
}

impl Record for Document {
    fn key(&self) -> &str {
        &self.key
    }
}
