pub use shared::ReadFailurePolicy;

use std::collections::BTreeMap;
use std::fmt;

/// Renders a value as one segment of a cache key.
pub trait KeyPart {
    fn key_part(&self) -> String;
}

macro_rules! display_key_part {
    ($($t:ty),* $(,)?) => {
        $(
            impl KeyPart for $t {
                fn key_part(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

display_key_part!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, bool, char, str, String);

impl<T: KeyPart + ?Sized> KeyPart for &T {
    fn key_part(&self) -> String {
        (**self).key_part()
    }
}

impl<T: KeyPart> KeyPart for Option<T> {
    fn key_part(&self) -> String {
        match self {
            Some(value) => value.key_part(),
            None => "None".to_string(),
        }
    }
}

/// The arguments of a logical call that identify its result.
///
/// Keyword arguments are kept sorted by name, so the order in which they are
/// added never changes the derived key. Adding the same name twice keeps the
/// last value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallArgs {
    positional: Vec<String>,
    keyword: BTreeMap<String, String>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl KeyPart) -> Self {
        self.positional.push(value.key_part());
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl KeyPart) -> Self {
        self.keyword.insert(name.into(), value.key_part());
        self
    }

    fn parts(&self) -> impl Iterator<Item = String> + '_ {
        self.positional.iter().cloned().chain(
            self.keyword
                .iter()
                .map(|(name, value)| format!("{}:{}", name, value)),
        )
    }
}

/// Key under which a call's result is cached.
///
/// Format: `{function}:{positional...}:{name}:{value}...`, all joined by `:`.
/// A call with no arguments yields `{function}:`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(function: &str, args: &CallArgs) -> Self {
        let parts: Vec<String> = args.parts().collect();
        CacheKey(format!("{}:{}", function, parts.join(":")))
    }

    /// Wrap an already-formatted key.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        CacheKey(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key prefixed with a namespace tag, e.g. `cache:get_user:user_id:42`.
    pub fn namespaced(&self, tag: &str) -> String {
        format!("{}:{}", tag, self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Outcome of a backend read.
///
/// `Unavailable` covers connection failures and timeouts. Callers that only
/// care about the value treat it like `Miss`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup {
    Hit(String),
    Miss,
    Unavailable(String),
}
