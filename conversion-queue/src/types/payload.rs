use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Supported conversion directions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversionType {
    PdfToDocx,
    DocxToPdf,
}

impl ConversionType {
    pub fn name(self) -> &'static str {
        match self {
            Self::PdfToDocx => "pdf-to-docx",
            Self::DocxToPdf => "docx-to-pdf",
        }
    }
}

impl std::fmt::Display for ConversionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ConversionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pdf-to-docx" => Ok(Self::PdfToDocx),
            "docx-to-pdf" => Ok(Self::DocxToPdf),
            _ => Err(format!("Invalid conversion type: {}", s)),
        }
    }
}

/// Task payload submitted with a conversion request.
///
/// Opaque to the scheduler apart from `conversion_id` and `user_id`,
/// which key the job and its notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionPayload {
    pub conversion_id: String,
    pub user_id: String,
    pub source_file_path: String,
    pub output_file_path: String,
    pub original_filename: String,
    pub conversion_type: ConversionType,
    pub quality: String,
    pub preserve_formatting: bool,
}

impl ConversionPayload {
    pub fn new(
        conversion_id: impl Into<String>,
        user_id: impl Into<String>,
        conversion_type: ConversionType,
    ) -> Self {
        Self {
            conversion_id: conversion_id.into(),
            user_id: user_id.into(),
            source_file_path: String::new(),
            output_file_path: String::new(),
            original_filename: String::new(),
            conversion_type,
            quality: "medium".to_string(),
            preserve_formatting: true,
        }
    }

    pub fn with_files(
        mut self,
        source_file_path: impl Into<String>,
        output_file_path: impl Into<String>,
        original_filename: impl Into<String>,
    ) -> Self {
        self.source_file_path = source_file_path.into();
        self.output_file_path = output_file_path.into();
        self.original_filename = original_filename.into();
        self
    }

    pub fn with_quality(mut self, quality: impl Into<String>) -> Self {
        self.quality = quality.into();
        self
    }

    pub fn with_preserve_formatting(mut self, preserve: bool) -> Self {
        self.preserve_formatting = preserve;
        self
    }
}

/// What the conversion routine reports back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOutcome {
    pub success: bool,
    pub page_count: Option<u32>,
    /// Wall-clock time the routine spent converting
    #[serde(with = "duration_ms", default)]
    pub conversion_time: Option<Duration>,
    pub result_file_id: Option<String>,
    pub error: Option<String>,
}

impl ConversionOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            page_count: None,
            conversion_time: None,
            result_file_id: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            page_count: None,
            conversion_time: None,
            result_file_id: None,
            error: Some(error.into()),
        }
    }

    pub fn with_page_count(mut self, page_count: u32) -> Self {
        self.page_count = Some(page_count);
        self
    }

    pub fn with_conversion_time(mut self, elapsed: Duration) -> Self {
        self.conversion_time = Some(elapsed);
        self
    }

    pub fn with_result_file_id(mut self, file_id: impl Into<String>) -> Self {
        self.result_file_id = Some(file_id.into());
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
