//! Environment configuration.
//!
//! Variables are read through `dotenvy` (so a `.env` file is honoured) and deserialized into
//! [`Env`] by a small map deserializer modelled on the [`envy`] crate: values are parsed into
//! numbers/bools on demand, comma-separated values become sequences and enum variants are
//! matched by name.
//!
//! [`envy`]: https://github.com/softprops/envy

use serde::Deserialize;
use serde::de::value::{MapDeserializer, SeqDeserializer};
use serde::de::{self, IntoDeserializer};
use thiserror::Error;

use crate::commands::DEFAULT_COMMAND_PREFIX;
use crate::cryptohack::CRYPTOHACK_BASE_URL;
use crate::db::StoreBackend;
use crate::scoreboard::{DEFAULT_FETCH_CONCURRENCY, DEFAULT_SCOREBOARD_LIMIT};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Env {
    #[serde(default = "default_irc_server")]
    pub irc_server: String,
    #[serde(default = "default_irc_port")]
    pub irc_port: u16,
    #[serde(default = "default_true")]
    pub irc_use_tls: bool,
    pub irc_nickname: String,
    pub irc_password: Option<String>,
    pub irc_channels: Vec<String>,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,

    #[serde(default)]
    pub store_backend: StoreBackend,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,

    #[serde(default = "default_cryptohack_base_url")]
    pub cryptohack_base_url: String,
    #[serde(
        default = "default_scoreboard_limit",
        deserialize_with = "deserialize_non_zero"
    )]
    pub scoreboard_limit: usize,
    #[serde(default = "default_scoreboard_concurrency")]
    pub scoreboard_concurrency: usize,

    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    pub otel_exporter_otlp_endpoint: Option<String>,
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Env {
    pub fn new() -> EnvResult<Self> {
        // a missing .env file is fine, the process env is still read
        if let Err(e) = dotenvy::dotenv()
            && !e.not_found()
        {
            return Err(e.into());
        }

        Ok(from_iter(std::env::vars())?)
    }
}

fn default_irc_server() -> String {
    String::from("irc.chat.twitch.tv")
}

fn default_irc_port() -> u16 {
    6697
}

fn default_true() -> bool {
    true
}

fn default_command_prefix() -> String {
    String::from(DEFAULT_COMMAND_PREFIX)
}

fn default_cryptohack_base_url() -> String {
    String::from(CRYPTOHACK_BASE_URL)
}

fn default_scoreboard_limit() -> usize {
    DEFAULT_SCOREBOARD_LIMIT
}

fn default_scoreboard_concurrency() -> usize {
    DEFAULT_FETCH_CONCURRENCY
}

fn deserialize_non_zero<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: de::Deserializer<'de>,
{
    match usize::deserialize(deserializer)? {
        0 => Err(de::Error::invalid_value(
            de::Unexpected::Unsigned(0),
            &"a value of at least 1",
        )),
        value => Ok(value),
    }
}

fn default_log_filter() -> String {
    format!("{}=debug,info", env!("CARGO_CRATE_NAME"))
}

fn default_service_name() -> String {
    String::from(env!("CARGO_PKG_NAME"))
}

// ---
//  Deserializer implementation
// ---

/// `(variable name, raw value)`; the name is kept around for error messages
struct Val(String, String);
struct Varname(String);

impl<'de> IntoDeserializer<'de, EnvDeserializeError> for Val {
    type Deserializer = Self;
    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

impl<'de> IntoDeserializer<'de, EnvDeserializeError> for Varname {
    type Deserializer = Self;
    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

macro_rules! forward_parsed_vals {
    ($($ty:ident => $method:ident,)*) => {
        $(
            fn $method<V>(self, visitor: V) -> Result<V::Value, EnvDeserializeError>
            where
                V: de::Visitor<'de>
            {
                match self.1.trim().parse::<$ty>() {
                    Ok(val) => val.into_deserializer().$method(visitor),
                    Err(e) => Err(de::Error::custom(format_args!(
                        "{}: while parsing '{}' (variable: {})",
                        e, self.1, self.0
                    )))
                }
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for Val {
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.1.into_deserializer().deserialize_any(visitor)
    }

    fn deserialize_seq<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        let name = self.0;
        let values: Vec<Val> = self
            .1
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Val(name.clone(), v.to_owned()))
            .collect();

        SeqDeserializer::new(values.into_iter()).deserialize_seq(visitor)
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        if self.1.trim().is_empty() {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_enum<V>(
        self,
        _: &'static str,
        _: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_enum(self.1.trim().to_lowercase().into_deserializer())
    }

    fn deserialize_newtype_struct<V>(
        self,
        _: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    forward_parsed_vals! {
        bool => deserialize_bool,
        u8 => deserialize_u8,
        u16 => deserialize_u16,
        u32 => deserialize_u32,
        u64 => deserialize_u64,
        i32 => deserialize_i32,
        i64 => deserialize_i64,
    }

    serde::forward_to_deserialize_any! {
        i8 i16 f32 f64 char str string unit bytes byte_buf map
        unit_struct tuple_struct identifier tuple ignored_any struct
    }
}

impl<'de> de::Deserializer<'de> for Varname {
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.0.into_deserializer().deserialize_any(visitor)
    }

    serde::forward_to_deserialize_any! {
        char str string unit seq option bytes byte_buf map newtype_struct
        unit_struct tuple_struct identifier tuple ignored_any
        bool u8 u16 u32 u64 u128 i8 i16 i32 i64 i128 f32 f64 enum struct
    }
}

/// Deserializes `T` from `(name, value)` pairs such as [`std::env::vars`].
pub fn from_iter<Iter, T>(iter: Iter) -> Result<T, EnvDeserializeError>
where
    T: de::DeserializeOwned,
    Iter: IntoIterator<Item = (String, String)>,
{
    let pairs = iter
        .into_iter()
        .map(|(k, v)| (Varname(k.clone()), Val(k, v)));

    T::deserialize(MapDeserializer::new(pairs))
}

impl de::Error for EnvDeserializeError {
    fn custom<T>(msg: T) -> Self
    where
        T: std::fmt::Display,
    {
        EnvDeserializeError::Custom(msg.to_string())
    }

    fn missing_field(field: &'static str) -> Self {
        EnvDeserializeError::MissingValue(field.into())
    }
}

pub type EnvResult<T> = core::result::Result<T, EnvErr>;

#[derive(Debug, Error)]
pub enum EnvErr {
    #[error(transparent)]
    Dotenvy(#[from] dotenvy::Error),

    #[error(transparent)]
    DeserializationError(#[from] EnvDeserializeError),
}

#[derive(Debug, Error)]
pub enum EnvDeserializeError {
    #[error("env deserialization error: {0}")]
    Custom(String),

    #[error("missing environment variable {0}")]
    MissingValue(String),
}

#[cfg(test)]
mod test {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let env: Env = from_iter(vars(&[
            ("IRC_NICKNAME", "hackbot"),
            ("IRC_CHANNELS", "ctf"),
            ("PATH", "/usr/bin"),
        ]))
        .unwrap();

        assert_eq!(env.irc_server, "irc.chat.twitch.tv");
        assert_eq!(env.irc_port, 6697);
        assert!(env.irc_use_tls);
        assert_eq!(env.irc_password, None);
        assert_eq!(env.irc_channels, vec!["ctf".to_string()]);
        assert_eq!(env.command_prefix, "!cryptohack");
        assert_eq!(env.store_backend, StoreBackend::Redis);
        assert_eq!(env.cryptohack_base_url, "https://cryptohack.org");
        assert_eq!(env.scoreboard_limit, 10);
        assert_eq!(env.scoreboard_concurrency, 4);
        assert_eq!(env.log_filter, "cryptohack_link=debug,info");
        assert_eq!(env.otel_exporter_otlp_endpoint, None);
    }

    #[test]
    fn test_overrides() {
        let env: Env = from_iter(vars(&[
            ("IRC_NICKNAME", "hackbot"),
            ("IRC_CHANNELS", "ctf, crypto ,,pwn"),
            ("IRC_PORT", "6667"),
            ("IRC_USE_TLS", "false"),
            ("IRC_PASSWORD", "oauth:abc"),
            ("STORE_BACKEND", "Postgres"),
            ("DATABASE_URL", "postgres://localhost/links"),
            ("SCOREBOARD_LIMIT", "25"),
            ("OTEL_EXPORTER_OTLP_ENDPOINT", ""),
        ]))
        .unwrap();

        assert_eq!(env.irc_channels, vec!["ctf", "crypto", "pwn"]);
        assert_eq!(env.irc_port, 6667);
        assert!(!env.irc_use_tls);
        assert_eq!(env.irc_password.as_deref(), Some("oauth:abc"));
        assert_eq!(env.store_backend, StoreBackend::Postgres);
        assert_eq!(
            env.database_url.as_deref(),
            Some("postgres://localhost/links")
        );
        assert_eq!(env.scoreboard_limit, 25);
        assert_eq!(env.otel_exporter_otlp_endpoint, None);
    }

    #[test]
    fn test_missing_required() {
        let err = from_iter::<_, Env>(vars(&[("IRC_CHANNELS", "ctf")])).unwrap_err();
        assert!(matches!(err, EnvDeserializeError::MissingValue(ref v) if v == "IRC_NICKNAME"));
    }

    #[test]
    fn test_zero_scoreboard_limit() {
        let err = from_iter::<_, Env>(vars(&[
            ("IRC_NICKNAME", "hackbot"),
            ("IRC_CHANNELS", "ctf"),
            ("SCOREBOARD_LIMIT", "0"),
        ]))
        .unwrap_err();

        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn test_bad_number() {
        let err = from_iter::<_, Env>(vars(&[
            ("IRC_NICKNAME", "hackbot"),
            ("IRC_CHANNELS", "ctf"),
            ("IRC_PORT", "lots"),
        ]))
        .unwrap_err();

        assert!(err.to_string().contains("IRC_PORT"));
    }
}
