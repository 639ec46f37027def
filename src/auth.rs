use crate::config::Config;
use crate::error::{Error, Result};
use crate::structs::{Identity, Role};

pub const ADMIN_ID: &str = "admin1";
pub const ADMIN_NAME: &str = "Admin User";

/// Checks the email step of the student login.
pub fn validate_college_email(email: &str, domain: &str) -> Result<String> {
    let email = email.trim();
    if email.is_empty() {
        return Err(Error::Validation("Please enter your college email".to_string()));
    }
    let local = email.strip_suffix(&format!("@{}", domain)).unwrap_or_default();
    if local.is_empty() || local.contains('@') {
        return Err(Error::Validation("Please use your college email address".to_string()));
    }
    Ok(email.to_string())
}

/// OTP delivery is simulated, so any well-formed 4 digit code is accepted.
pub fn verify_otp(email: &str, otp: &str) -> Result<Identity> {
    let otp = otp.trim();
    if otp.len() != 4 || !otp.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::Validation("Please enter a valid OTP".to_string()));
    }

    let name = email.split('@').next().unwrap_or(email).to_string();
    Ok(Identity {
        id: email.to_string(),
        name,
        email: email.to_string(),
        role: Role::Student,
    })
}

pub fn admin_login(username: &str, password: &str, config: &Config) -> Result<Identity> {
    if username.trim().is_empty() || password.is_empty() {
        return Err(Error::Validation("Please enter both username and password".to_string()));
    }
    if username.trim() != config.admin_username || password != config.admin_password {
        log::warn!("Rejected admin login for {:?}", username);
        return Err(Error::Validation("Invalid username or password".to_string()));
    }

    Ok(Identity {
        id: ADMIN_ID.to_string(),
        name: ADMIN_NAME.to_string(),
        email: format!("admin@{}", config.college_domain),
        role: Role::Admin,
    })
}
