//! Черновики запросов, которые проверяются на клиенте до любого сетевого вызова.

use std::path::PathBuf;

use serde::Serialize;
use validator::Validate;

use crate::error::ClientResult;

#[derive(Debug, Clone, Serialize, Validate)]
/// Данные для входа.
pub struct Credentials {
    /// Email пользователя.
    #[validate(email(message = "Enter a valid email address"))]
    pub email: String,
    /// Пароль.
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

impl Credentials {
    /// Нормализует и проверяет данные для входа.
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> ClientResult<Self> {
        let draft = Self {
            email: email.into().trim().to_string(),
            password: password.into(),
        };
        draft.validate()?;
        Ok(draft)
    }
}

#[derive(Debug, Clone, Serialize, Validate)]
/// Данные для регистрации.
pub struct Registration {
    /// Отображаемое имя.
    #[validate(length(min = 1, max = 255, message = "Name must be 1..255 chars"))]
    pub name: String,
    /// Email.
    #[validate(email(message = "Enter a valid email address"))]
    pub email: String,
    /// Пароль.
    #[validate(length(min = 8, message = "Password must be at least 8 chars"))]
    pub password: String,
    /// Повтор пароля.
    #[validate(must_match(other = "password", message = "Passwords do not match"))]
    pub password_confirmation: String,
}

impl Registration {
    /// Нормализует и проверяет данные регистрации.
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
        password_confirmation: impl Into<String>,
    ) -> ClientResult<Self> {
        let draft = Self {
            name: name.into().trim().to_string(),
            email: email.into().trim().to_string(),
            password: password.into(),
            password_confirmation: password_confirmation.into(),
        };
        draft.validate()?;
        Ok(draft)
    }
}

#[derive(Debug, Clone, Validate)]
/// Черновик поста для создания или обновления.
pub struct PostDraft {
    /// Заголовок.
    #[validate(length(min = 1, max = 255, message = "Title must be 1..255 chars"))]
    pub title: String,
    /// Содержимое.
    #[validate(length(min = 1, message = "Content must not be empty"))]
    pub content: String,
    /// Категория.
    #[validate(length(min = 1, max = 100, message = "Category is required"))]
    pub category: String,
    /// Локальный файл изображения для загрузки.
    pub image: Option<PathBuf>,
}

impl PostDraft {
    /// Нормализует и проверяет черновик поста.
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        category: impl Into<String>,
        image: Option<PathBuf>,
    ) -> ClientResult<Self> {
        let draft = Self {
            title: title.into().trim().to_string(),
            content: content.into().trim().to_string(),
            category: category.into().trim().to_string(),
            image,
        };
        draft.validate()?;
        Ok(draft)
    }
}

#[derive(Debug, Clone, Serialize, Validate)]
/// Черновик комментария.
pub struct CommentDraft {
    /// Текст комментария.
    #[validate(length(min = 1, max = 1000, message = "Comment must be 1..1000 chars"))]
    pub content: String,
}

impl CommentDraft {
    /// Нормализует и проверяет комментарий. Пустой текст отклоняется.
    pub fn new(content: impl Into<String>) -> ClientResult<Self> {
        let draft = Self {
            content: content.into().trim().to_string(),
        };
        draft.validate()?;
        Ok(draft)
    }
}
