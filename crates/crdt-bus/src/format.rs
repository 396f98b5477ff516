use crate::error::BusError;

/// Tags a bus payload's byte-string encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncodingFormat {
    Json,
    Binary,
    /// Reserved for a future divergence from verbose JSON; currently an
    /// alias with identical bytes.
    Text,
    Base64,
}

impl EncodingFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            EncodingFormat::Json => "json",
            EncodingFormat::Binary => "binary",
            EncodingFormat::Text => "text",
            EncodingFormat::Base64 => "base64",
        }
    }

    pub fn parse(name: &str) -> Result<Self, BusError> {
        match name {
            "json" => Ok(EncodingFormat::Json),
            "binary" => Ok(EncodingFormat::Binary),
            "text" => Ok(EncodingFormat::Text),
            "base64" => Ok(EncodingFormat::Base64),
            other => Err(BusError::UnsupportedFormat(other.to_string())),
        }
    }
}
