// src/utils/form.rs

use std::collections::HashMap;

use axum::{body::Bytes, extract::Multipart};

use crate::error::AppError;

/// A file part of a multipart form, fully buffered.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// A decoded multipart form: repeated text fields and repeated file fields by name.
#[derive(Debug, Default)]
pub struct FormData {
    values: HashMap<String, Vec<String>>,
    files: HashMap<String, Vec<UploadedFile>>,
}

impl FormData {
    /// Drains the multipart stream once. A part with a filename is a file, anything else is text.
    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = FormData::default();

        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            if field.file_name().is_some() {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await?;
                form.files.entry(name).or_default().push(UploadedFile {
                    file_name,
                    content_type,
                    data,
                });
            } else {
                let text = field.text().await?;
                form.values.entry(name).or_default().push(text);
            }
        }

        Ok(form)
    }

    /// First value of a text field, if present and non-empty after trimming.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)
            .and_then(|v| v.first())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    /// All values of a repeated text field (`None` when the field was never sent).
    pub fn texts(&self, name: &str) -> Option<&[String]> {
        self.values.get(name).map(Vec::as_slice)
    }

    pub fn file_count(&self, name: &str) -> usize {
        self.files.get(name).map_or(0, Vec::len)
    }

    pub fn take_files(&mut self, name: &str) -> Vec<UploadedFile> {
        self.files.remove(name).unwrap_or_default()
    }
}
