use crate::utils::error::ServiceError;
use crate::Result;
use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, FromRequestParts, Multipart, Request},
    http::{header::CONTENT_TYPE, request::Parts},
    Form,
};
use std::collections::HashMap;
use std::str::FromStr;

/// 表单中上传的文件
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field: String,
    pub file_name: Option<String>,
    pub data: Bytes,
}

/// 表单提取器，同时支持 multipart/form-data 和 urlencoded
#[derive(Debug, Default)]
pub struct UploadForm {
    pub fields: HashMap<String, String>,
    pub files: Vec<UploadedFile>,
}

impl UploadForm {
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// 解析可选的表单字段
    pub fn parse<T: FromStr>(&self, name: &str) -> Result<Option<T>> {
        match self.text(name) {
            Some(value) => value.parse().map(Some).map_err(|_| {
                ServiceError::InvalidInput(format!("Invalid value '{}' for field '{}'", value, name))
            }),
            None => Ok(None),
        }
    }

    /// 必填的文本字段
    pub fn require(&self, name: &str) -> Result<&str> {
        self.text(name)
            .ok_or_else(|| ServiceError::InvalidInput(format!("Missing form field '{}'", name)))
    }

    /// 第一个上传的文件
    pub fn first_file(&self) -> Result<&UploadedFile> {
        self.files
            .first()
            .ok_or_else(|| ServiceError::InvalidInput("No image file provided".to_string()))
    }
}

#[async_trait]
impl<S> FromRequest<S> for UploadForm
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state).await.map_err(|e| {
                ServiceError::InvalidInput(format!("Invalid multipart request: {}", e.body_text()))
            })?;
            Self::from_multipart(multipart).await
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(fields) = Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(|e| {
                    ServiceError::InvalidInput(format!("Invalid form request: {}", e.body_text()))
                })?;
            Ok(Self {
                fields,
                files: Vec::new(),
            })
        } else {
            Err(ServiceError::UnsupportedFormat(format!(
                "expected multipart/form-data or application/x-www-form-urlencoded, got '{}'",
                content_type
            )))
        }
    }
}

impl UploadForm {
    async fn from_multipart(mut multipart: Multipart) -> Result<Self> {
        let mut form = UploadForm::default();

        // 解析multipart数据
        while let Some(field) = multipart.next_field().await.map_err(|e| {
            ServiceError::InvalidInput(format!("Failed to read multipart field: {}", e))
        })? {
            let field_name = field.name().unwrap_or("unknown").to_string();
            let file_name = field.file_name().map(str::to_string);

            if file_name.is_none() {
                let value = field.text().await.map_err(|e| {
                    ServiceError::InvalidInput(format!("Failed to read field '{}': {}", field_name, e))
                })?;
                form.fields.insert(field_name, value);
                continue;
            }

            // 验证内容类型
            if let Some(content_type) = field.content_type() {
                if !content_type.starts_with("image/") && content_type != "application/octet-stream"
                {
                    return Err(ServiceError::UnsupportedFormat(content_type.to_string()));
                }
            }

            let data = field.bytes().await.map_err(|e| {
                ServiceError::InvalidInput(format!("Failed to read file data: {}", e))
            })?;

            tracing::debug!(
                "Received file field '{}' ({:?}): {} bytes",
                field_name,
                file_name,
                data.len()
            );

            form.files.push(UploadedFile {
                field: field_name,
                file_name,
                data,
            });
        }

        Ok(form)
    }
}

/// 请求ID提取器
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        let request_id = parts
            .headers
            .get("X-Request-ID")
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(|s| s.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(RequestId(request_id))
    }
}
