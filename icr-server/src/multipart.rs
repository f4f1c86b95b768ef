//! Multipart form parsing helpers
//!
//! Collects the image files and text fields of a multipart/form-data upload.

use std::collections::HashMap;

use axum::extract::Multipart;
use icr_core::UploadImage;

use crate::error::ApiError;
use crate::validation::{validate_content_type, validate_file_size, MAX_IMAGES_PER_UPLOAD};

/// Field names that carry image files
const FILE_FIELDS: &[&str] = &["images", "images[]", "file"];

/// Represents a file uploaded via multipart form
#[derive(Debug, Clone)]
pub struct FileField {
    /// File data bytes
    pub data: Vec<u8>,
    /// Content-Type from the multipart field (if provided)
    pub content_type: Option<String>,
    /// Original filename from the multipart field (if provided)
    pub file_name: Option<String>,
}

impl From<FileField> for UploadImage {
    fn from(file: FileField) -> Self {
        UploadImage::new(file.data, file.file_name)
    }
}

/// Parsed multipart form fields
///
/// Files keep their request order. Text fields are indexed by name; a
/// repeated text field keeps its last value.
#[derive(Debug)]
pub struct MultipartFields {
    files: Vec<FileField>,
    text_fields: HashMap<String, String>,
}

impl MultipartFields {
    /// Parse all fields from a multipart request
    ///
    /// Every file is checked against the allowed Content-Types and
    /// `max_file_size` as it is read.
    pub async fn parse(multipart: &mut Multipart, max_file_size: usize) -> Result<Self, ApiError> {
        let mut files = Vec::new();
        let mut text_fields = HashMap::new();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to parse multipart: {}", e)))?
        {
            let name = field.name().unwrap_or("").to_string();

            if FILE_FIELDS.contains(&name.as_str()) {
                if files.len() == MAX_IMAGES_PER_UPLOAD {
                    return Err(ApiError::bad_request(format!(
                        "Too many images: at most {} per upload",
                        MAX_IMAGES_PER_UPLOAD
                    )));
                }

                let content_type = field.content_type().map(|s| s.to_string());
                let file_name = field.file_name().map(|s| s.to_string());
                validate_content_type(content_type.as_deref())?;

                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read file: {}", e)))?
                    .to_vec();
                validate_file_size(data.len(), max_file_size)?;

                files.push(FileField {
                    data,
                    content_type,
                    file_name,
                });
            } else {
                let value = field.text().await.map_err(|e| {
                    ApiError::bad_request(format!("Failed to read field '{}': {}", name, e))
                })?;
                text_fields.insert(name, value);
            }
        }

        Ok(Self { files, text_fields })
    }

    /// Take the uploaded files (at least one required)
    pub fn require_files(&mut self) -> Result<Vec<FileField>, ApiError> {
        if self.files.is_empty() {
            return Err(ApiError::bad_request(
                "No images provided. Use 'images' or 'file' fields in multipart form.",
            ));
        }
        Ok(std::mem::take(&mut self.files))
    }

    /// Get a text field value, treating blank values as absent
    pub fn get_text(&self, name: &str) -> Option<&str> {
        self.text_fields
            .get(name)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_text() {
        let mut text_fields = HashMap::new();
        text_fields.insert("batch_id".to_string(), " shelf_3 ".to_string());
        text_fields.insert("blank".to_string(), "   ".to_string());

        let fields = MultipartFields {
            files: Vec::new(),
            text_fields,
        };

        assert_eq!(fields.get_text("batch_id"), Some("shelf_3"));
        assert_eq!(fields.get_text("blank"), None);
        assert_eq!(fields.get_text("missing"), None);
    }

    #[test]
    fn test_require_files_missing() {
        let mut fields = MultipartFields {
            files: Vec::new(),
            text_fields: HashMap::new(),
        };

        assert!(fields.require_files().is_err());
    }

    #[test]
    fn test_file_field_into_upload_image() {
        let file = FileField {
            data: vec![1, 2, 3],
            content_type: Some("image/png".into()),
            file_name: Some("slab.png".into()),
        };
        let upload = UploadImage::from(file);
        assert_eq!(upload.bytes, vec![1, 2, 3]);
        assert_eq!(upload.filename.as_deref(), Some("slab.png"));
    }
}
