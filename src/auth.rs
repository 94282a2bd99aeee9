use chrono::{Duration, Utc};
use pbkdf2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use pbkdf2::Pbkdf2;
use rand::Rng;
use rand_core::OsRng;
use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};

pub const SESSION_TTL_DAYS: i64 = 2;
pub const GENERATED_PASSWORD_LEN: usize = 12;

// Ambiguous glyphs (0/O, 1/l/I) left out so a password read over the phone
// survives transcription.
const PASSWORD_CHARSET: &[u8] =
    b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz23456789!@#$%&*+=?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    DirectionMember,
    Prof,
    Student,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::DirectionMember => "DIRECTION_MEMBER",
            Role::Prof => "PROF",
            Role::Student => "STUDENT",
        }
    }

    pub fn parse(raw: &str) -> Option<Role> {
        match raw {
            "ADMIN" => Some(Role::Admin),
            "DIRECTION_MEMBER" => Some(Role::DirectionMember),
            "PROF" => Some(Role::Prof),
            "STUDENT" => Some(Role::Student),
            _ => None,
        }
    }
}

/// The acting identity resolved from a session token. Passed explicitly into
/// every handler that needs it; there is no ambient current-user state.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub role: Role,
    pub avatar_url: Option<String>,
    pub scan_id: Option<String>,
    pub payment_status: Option<String>,
    pub major: Option<String>,
    pub level: Option<String>,
    pub created_at: String,
    pub updated_at: Option<String>,
}

const USER_COLUMNS: &str = "u.id, u.full_name, u.email, u.role, u.avatar_url, u.scan_id,
     u.payment_status, u.major, u.level, u.created_at, u.updated_at";

fn map_user_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<AuthUser> {
    let role_raw: String = r.get(3)?;
    let role = Role::parse(&role_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown role: {}", role_raw).into(),
        )
    })?;
    Ok(AuthUser {
        id: r.get(0)?,
        full_name: r.get(1)?,
        email: r.get(2)?,
        role,
        avatar_url: r.get(4)?,
        scan_id: r.get(5)?,
        payment_status: r.get(6)?,
        major: r.get(7)?,
        level: r.get(8)?,
        created_at: r.get(9)?,
        updated_at: r.get(10)?,
    })
}

pub fn user_by_id(conn: &Connection, id: &str) -> rusqlite::Result<Option<AuthUser>> {
    conn.query_row(
        &format!("SELECT {} FROM users u WHERE u.id = ?", USER_COLUMNS),
        [id],
        map_user_row,
    )
    .optional()
}

/// Resolves a bearer token to its user, pruning expired sessions on the way.
pub fn user_for_token(conn: &Connection, token: &str) -> rusqlite::Result<Option<AuthUser>> {
    conn.execute(
        "DELETE FROM sessions WHERE expires_at < ?",
        [Utc::now().to_rfc3339()],
    )?;
    conn.query_row(
        &format!(
            "SELECT {} FROM sessions s JOIN users u ON u.id = s.user_id WHERE s.token = ?",
            USER_COLUMNS
        ),
        [token],
        map_user_row,
    )
    .optional()
}

pub fn create_session(conn: &Connection, user_id: &str) -> rusqlite::Result<(String, String)> {
    let token = mint_token();
    let now = Utc::now();
    let expires_at = (now + Duration::days(SESSION_TTL_DAYS)).to_rfc3339();
    conn.execute(
        "INSERT INTO sessions(token, user_id, expires_at, created_at) VALUES(?, ?, ?, ?)",
        (&token, user_id, &expires_at, now.to_rfc3339()),
    )?;
    Ok((token, expires_at))
}

pub fn drop_session(conn: &Connection, token: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM sessions WHERE token = ?", [token])?;
    Ok(())
}

pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Pbkdf2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("hash password: {}", e))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Pbkdf2
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

pub fn mint_token() -> String {
    let seed: [u8; 32] = rand::thread_rng().gen();
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hex::encode(hasher.finalize())
}

pub fn generate_password() -> String {
    let mut rng = rand::thread_rng();
    (0..GENERATED_PASSWORD_LEN)
        .map(|_| {
            let i = rng.gen_range(0..PASSWORD_CHARSET.len());
            PASSWORD_CHARSET[i] as char
        })
        .collect()
}
