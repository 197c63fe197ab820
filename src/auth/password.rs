use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

pub const MIN_PASSWORD_LENGTH: usize = 8;

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// Strength policy for new passwords. Returns every failed rule so the
/// caller can attach them all to the password field.
///
/// `related` holds user attributes (username, email, names) the password
/// must not equal.
pub fn check_password_strength(plain: &str, related: &[&str]) -> Vec<String> {
    let mut problems = Vec::new();

    if plain.chars().count() < MIN_PASSWORD_LENGTH {
        problems.push(format!(
            "This password is too short. It must contain at least {} characters.",
            MIN_PASSWORD_LENGTH
        ));
    }

    if !plain.is_empty() && plain.chars().all(|c| c.is_ascii_digit()) {
        problems.push("This password is entirely numeric.".to_string());
    }

    let lowered = plain.to_lowercase();
    let similar = related
        .iter()
        .filter(|attr| !attr.is_empty())
        .any(|attr| {
            let attr = attr.to_lowercase();
            let local = attr.split('@').next().unwrap_or_default().to_string();
            lowered == attr || (!local.is_empty() && lowered == local)
        });
    if similar {
        problems.push("The password is too similar to your account details.".to_string());
    }

    problems
}
