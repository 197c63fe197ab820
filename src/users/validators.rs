//! Validation rules for every account-changing request.
//!
//! Each routine is a function of the request body and the persisted user
//! state. Failures are collected into one [`ValidationErrors`] so a client
//! can show every problem at once; nothing is persisted here.

use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;

use super::{
    dto::{ChangeEmailRequest, ChangePasswordRequest, LoginRequest, RegisterRequest},
    repo::UserStore,
    repo_types::User,
};
use crate::{
    auth::password::check_password_strength,
    config::AccountsConfig,
    error::{AppError, AppResult, ValidationErrors, NON_FIELD_ERRORS},
    images::services::ext_from_mime,
};

pub const REQUIRED: &str = "This field is required.";
pub const BLANK: &str = "This field may not be blank.";
pub const INVALID_EMAIL: &str = "Enter a valid email address.";
pub const INVALID_CREDENTIALS: &str = "Invalid email/password";
pub const WRONG_CURRENT_PASSWORD: &str = "Current password is incorrect.";
pub const PASSWORD_MISMATCH: &str = "New password and Confirm password do not match.";
pub const EMAIL_MISMATCH: &str = "New email and confirm email do not match.";
pub const EMAIL_IN_USE: &str = "This email is already in use.";

pub const USERNAME_MAX_LENGTH: usize = 150;
pub const NAME_MAX_LENGTH: usize = 150;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    email.len() <= 254 && EMAIL_RE.is_match(email)
}

fn is_valid_username(username: &str) -> bool {
    lazy_static! {
        static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.@+-]+$").unwrap();
    }
    username.chars().count() <= USERNAME_MAX_LENGTH && USERNAME_RE.is_match(username)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Records `REQUIRED`/`BLANK` for `field` and returns the value otherwise.
fn required<'a>(errors: &mut ValidationErrors, field: &str, value: Option<&'a str>) -> Option<&'a str> {
    match value {
        None => {
            errors.add(field, REQUIRED);
            None
        }
        Some(v) if v.trim().is_empty() => {
            errors.add(field, BLANK);
            None
        }
        Some(v) => Some(v),
    }
}

/// Like [`required`] but with a field-specific message for missing or blank input.
fn required_named<'a>(
    errors: &mut ValidationErrors,
    field: &str,
    value: Option<&'a str>,
    message: &str,
) -> Option<&'a str> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Some(v),
        _ => {
            errors.add(field, message);
            None
        }
    }
}

fn check_current_password(errors: &mut ValidationErrors, caller: &User, current: Option<&str>) -> AppResult<()> {
    if let Some(current) = required(errors, "current_password", current) {
        if !caller.check_password(current)? {
            errors.add("current_password", WRONG_CURRENT_PASSWORD);
        }
    }
    Ok(())
}

/// Registration input that passed every rule.
#[derive(Debug, Clone)]
pub struct ValidRegistration {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

pub async fn validate_registration(
    store: &dyn UserStore,
    rules: &AccountsConfig,
    input: &RegisterRequest,
) -> AppResult<ValidRegistration> {
    let mut errors = ValidationErrors::new();

    let first_name = required_named(&mut errors, "first_name", input.first_name.as_deref(), "First name is required");
    let last_name = required_named(&mut errors, "last_name", input.last_name.as_deref(), "Last name is required");
    let username = required_named(&mut errors, "username", input.username.as_deref(), "Username is required");
    let email = required(&mut errors, "email", input.email.as_deref()).map(normalize_email);
    let password1 = required(&mut errors, "password1", input.password1.as_deref());
    let password2 = required(&mut errors, "password2", input.password2.as_deref());

    for (field, value) in [("first_name", first_name), ("last_name", last_name)] {
        if value.is_some_and(|v| v.chars().count() > NAME_MAX_LENGTH) {
            errors.add(
                field,
                format!("Ensure this value has at most {} characters.", NAME_MAX_LENGTH),
            );
        }
    }

    if let Some(username) = username {
        if !is_valid_username(username) {
            errors.add(
                "username",
                format!(
                    "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters, at most {} of them.",
                    USERNAME_MAX_LENGTH
                ),
            );
        } else if store.username_exists(username).await? {
            errors.add("username", "A user with that username already exists.");
        }
    }

    if let Some(email) = email.as_deref() {
        if !is_valid_email(email) {
            errors.add("email", INVALID_EMAIL);
        } else if store.email_taken(email, None).await? {
            errors.add("email", "A user with that email already exists.");
        }
    }

    if rules.require_password_match {
        if let (Some(p1), Some(p2)) = (password1, password2) {
            if p1 != p2 {
                errors.add("password2", "The two password fields didn't match.");
            }
        }
    }

    if rules.enforce_password_strength {
        if let Some(p1) = password1 {
            let related = [
                username.unwrap_or_default(),
                email.as_deref().unwrap_or_default(),
                first_name.unwrap_or_default(),
                last_name.unwrap_or_default(),
            ];
            for problem in check_password_strength(p1, &related) {
                errors.add("password1", problem);
            }
        }
    }

    errors.into_result()?;

    // Every Option below is Some once `errors` is empty.
    match (first_name, last_name, username, email, password1) {
        (Some(first_name), Some(last_name), Some(username), Some(email), Some(password)) => Ok(ValidRegistration {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            username: username.to_string(),
            email,
            password: password.to_string(),
        }),
        _ => Err(AppError::Internal(anyhow::anyhow!("registration passed validation with missing fields"))),
    }
}

/// Resolves the credentials to a user. Unknown email and wrong password
/// produce the same error.
pub async fn validate_login(store: &dyn UserStore, input: &LoginRequest) -> AppResult<User> {
    let mut errors = ValidationErrors::new();
    let email = required(&mut errors, "email", input.email.as_deref());
    let password = required(&mut errors, "password", input.password.as_deref());
    errors.into_result()?;

    let (Some(email), Some(password)) = (email, password) else {
        return Err(ValidationErrors::single(NON_FIELD_ERRORS, INVALID_CREDENTIALS).into());
    };

    let user = store.find_by_email(&normalize_email(email)).await?;
    match user {
        Some(user) if user.check_password(password)? => Ok(user),
        _ => Err(ValidationErrors::single(NON_FIELD_ERRORS, INVALID_CREDENTIALS).into()),
    }
}

/// Returns the new plaintext password for the caller to hash and persist.
pub fn validate_password_change(
    caller: &User,
    rules: &AccountsConfig,
    input: &ChangePasswordRequest,
) -> AppResult<String> {
    let mut errors = ValidationErrors::new();

    let new_password = required(&mut errors, "new_password", input.new_password.as_deref());
    let confirm = required(&mut errors, "confirm_new_password", input.confirm_new_password.as_deref());

    if let (Some(new_password), Some(confirm)) = (new_password, confirm) {
        if new_password != confirm {
            errors.add(NON_FIELD_ERRORS, PASSWORD_MISMATCH);
        }
    }

    check_current_password(&mut errors, caller, input.current_password.as_deref())?;

    if rules.enforce_password_strength {
        if let Some(new_password) = new_password {
            let related = [
                caller.username.as_str(),
                caller.email.as_str(),
                caller.first_name.as_str(),
                caller.last_name.as_str(),
            ];
            for problem in check_password_strength(new_password, &related) {
                errors.add("new_password", problem);
            }
        }
    }

    errors.into_result()?;
    Ok(new_password.unwrap_or_default().to_string())
}

/// Returns the normalized new email. The current password, the confirmation
/// and the uniqueness check each report under their own key.
pub async fn validate_email_change(
    store: &dyn UserStore,
    caller: &User,
    input: &ChangeEmailRequest,
) -> AppResult<String> {
    let mut errors = ValidationErrors::new();

    check_current_password(&mut errors, caller, input.current_password.as_deref())?;

    let new_email = required(&mut errors, "new_email", input.new_email.as_deref()).map(normalize_email);
    let confirm = required(&mut errors, "confirm_new_email", input.confirm_new_email.as_deref()).map(normalize_email);

    let new_email = new_email.filter(|e| {
        let ok = is_valid_email(e);
        if !ok {
            errors.add("new_email", INVALID_EMAIL);
        }
        ok
    });
    if let Some(confirm) = confirm.as_deref() {
        if !is_valid_email(confirm) {
            errors.add("confirm_new_email", INVALID_EMAIL);
        }
    }

    if let (Some(new_email), Some(confirm)) = (new_email.as_deref(), confirm.as_deref()) {
        if new_email != confirm {
            errors.add("email_mismatch", EMAIL_MISMATCH);
        }
    }

    if let Some(new_email) = new_email.as_deref() {
        if store.email_taken(new_email, Some(caller.id)).await? {
            errors.add("email_exists", EMAIL_IN_USE);
        }
    }

    errors.into_result()?;
    Ok(new_email.unwrap_or_default())
}

/// A file received in the `image` field.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub content_type: String,
    pub body: Bytes,
}

/// File-field checks for a profile image. Hands the upload back with the
/// file extension to store it under.
pub fn validate_profile_image(
    upload: Option<ImageUpload>,
    max_bytes: usize,
) -> AppResult<(ImageUpload, &'static str)> {
    let Some(upload) = upload else {
        return Err(ValidationErrors::single("image", "No file was submitted.").into());
    };

    let mut errors = ValidationErrors::new();

    if upload.body.is_empty() {
        errors.add("image", "The submitted file is empty.");
    } else if upload.body.len() > max_bytes {
        errors.add("image", format!("Ensure this file is at most {} bytes.", max_bytes));
    }

    match ext_from_mime(&upload.content_type) {
        Some(ext) => {
            errors.into_result()?;
            Ok((upload, ext))
        }
        None => {
            errors.add(
                "image",
                "Upload a valid image. The file you uploaded was either not an image or a corrupted image.",
            );
            Err(errors.into())
        }
    }
}
