use chrono::Utc;
use rusqlite::OptionalExtension;
use uuid::Uuid;

use crate::auth::AccountStore;
use crate::db::models::{NewAccount, UserProfile};
use crate::db::{self, SqliteStore};
use crate::error::StoreError;

const NICKNAME_MIN: usize = 3;
const NICKNAME_MAX: usize = 30;
const PASSWORD_MIN: usize = 6;

/// Map a `user_id, nickname, first_name, last_name, email, age, gender` row.
pub(crate) fn profile_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        user_id: row.get(0)?,
        nickname: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        email: row.get(4)?,
        age: row.get(5)?,
        gender: row.get(6)?,
    })
}

/// Field checks applied before anything touches the database.
pub fn validate_new_account(account: &NewAccount) -> Result<(), StoreError> {
    let required = [
        ("first name", &account.first_name),
        ("last name", &account.last_name),
        ("nickname", &account.nickname),
        ("email", &account.email),
        ("password", &account.password),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(StoreError::Validation(format!("{} is required", field)));
        }
    }

    let nickname_len = account.nickname.trim().chars().count();
    if !(NICKNAME_MIN..=NICKNAME_MAX).contains(&nickname_len) {
        return Err(StoreError::Validation(format!(
            "nickname must be {}-{} characters",
            NICKNAME_MIN, NICKNAME_MAX
        )));
    }
    if account.nickname.contains('@') {
        return Err(StoreError::Validation(
            "nickname cannot contain '@'".to_string(),
        ));
    }

    let email = account.email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => {}
        _ => return Err(StoreError::Validation("email is invalid".to_string())),
    }

    if account.password.chars().count() < PASSWORD_MIN {
        return Err(StoreError::Validation(format!(
            "password must be at least {} characters",
            PASSWORD_MIN
        )));
    }

    Ok(())
}

impl AccountStore for SqliteStore {
    fn register(&self, account: &NewAccount) -> Result<UserProfile, StoreError> {
        validate_new_account(account)?;

        let nickname = account.nickname.trim().to_string();
        let email = account.email.trim().to_lowercase();

        // Hash before taking the connection lock
        let password_hash = bcrypt::hash(&account.password, self.hash_cost())?;

        let conn = self.conn()?;

        let taken: Option<String> = conn
            .query_row(
                "SELECT user_id FROM users WHERE nickname = ?1 COLLATE NOCASE OR email = ?2",
                rusqlite::params![nickname, email],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(StoreError::Conflict(
                "nickname or email already taken".to_string(),
            ));
        }

        let profile = UserProfile {
            user_id: Uuid::now_v7().to_string(),
            nickname,
            first_name: account.first_name.trim().to_string(),
            last_name: account.last_name.trim().to_string(),
            email,
            age: account.age,
            gender: account.gender.trim().to_string(),
        };

        conn.execute(
            "INSERT INTO users (user_id, nickname, email, password_hash, first_name, last_name, age, gender, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                profile.user_id,
                profile.nickname,
                profile.email,
                password_hash,
                profile.first_name,
                profile.last_name,
                profile.age,
                profile.gender,
                db::format_timestamp(&Utc::now()),
            ],
        )?;

        tracing::info!(user_id = %profile.user_id, nickname = %profile.nickname, "User registered");

        Ok(profile)
    }

    fn authenticate(&self, identifier: &str, password: &str) -> Result<UserProfile, StoreError> {
        let identifier = identifier.trim();
        if identifier.is_empty() || password.is_empty() {
            return Err(StoreError::NotFound);
        }

        let row = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT user_id, nickname, first_name, last_name, email, age, gender, password_hash
                 FROM users
                 WHERE email = ?1 COLLATE NOCASE OR nickname = ?1 COLLATE NOCASE",
                [identifier],
                |row| Ok((profile_from_row(row)?, row.get::<_, String>(7)?)),
            )
            .optional()?
        };

        let (profile, password_hash) = row.ok_or(StoreError::NotFound)?;

        if bcrypt::verify(password, &password_hash)? {
            Ok(profile)
        } else {
            Err(StoreError::NotFound)
        }
    }
}
