//! Cloud-specific tag normalization.
//!
//! Each cloud accepts a different character set and length for tag keys and
//! values. Normalization replaces what the cloud rejects with `_` and
//! truncates to the cloud's maximum length.

use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Cloud {
    #[default]
    Aws,
    Azure,
    Gcp,
}

impl Cloud {
    /// Classify a workspace host.
    pub fn from_host(host: &str) -> Self {
        let host = url::Url::parse(host)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| host.to_string());

        if host.ends_with(".azuredatabricks.net") {
            Cloud::Azure
        } else if host.ends_with(".gcp.databricks.com") {
            Cloud::Gcp
        } else {
            Cloud::Aws
        }
    }

    pub fn normalize_key(&self, key: &str) -> String {
        match self {
            Cloud::Aws => truncate(&replace_not_in(&strip_marks(key), is_aws_char), 127),
            Cloud::Azure => {
                let s = replace_not_in(key, is_latin1);
                truncate(&replace_not_in(&s, |c| !"<>*&%;\\/+?".contains(c)), 512)
            }
            Cloud::Gcp => gcp(key),
        }
    }

    pub fn normalize_value(&self, value: &str) -> String {
        match self {
            Cloud::Aws => truncate(&replace_not_in(&strip_marks(value), is_aws_char), 255),
            Cloud::Azure => truncate(&replace_not_in(value, is_latin1), 256),
            Cloud::Gcp => gcp(value),
        }
    }
}

fn gcp(s: &str) -> String {
    let s = replace_not_in(&strip_marks(s), |c| {
        c.is_ascii_alphanumeric() || "_.-".contains(c)
    });
    let s = s.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    truncate(s, 63)
}

fn is_latin1(c: char) -> bool {
    (c as u32) <= 0xFF
}

fn is_aws_char(c: char) -> bool {
    is_latin1(c) && (c.is_alphanumeric() || c.is_whitespace() || "+-=.:/@".contains(c))
}

/// Decompose and drop combining marks: "é" becomes "e".
fn strip_marks(s: &str) -> String {
    s.nfd().filter(|c| !is_combining_mark(*c)).nfc().collect()
}

fn replace_not_in(s: &str, allowed: impl Fn(char) -> bool) -> String {
    s.chars().map(|c| if allowed(c) { c } else { '_' }).collect()
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
