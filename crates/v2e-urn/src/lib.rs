//! Canonical checkpoint identifier for ingested catalog items.
//!
//! A URN is the ordered triple `(provider, type, atomicId)` serialized as
//! `v2e::<provider>::<type>::<atomicId>`. It is the stable key used by the
//! persistent store to address checkpoints, and the only cross-cutting
//! identifier the core understands — everything else about a record is
//! opaque to it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const PREFIX: &str = "v2e";
const SEP: &str = "::";

// ---------------------------------------------------------------------------
// Provider / RecordType — closed enumerations
// ---------------------------------------------------------------------------

/// A catalog source this system knows how to ingest from.
///
/// Closed by design: a URN naming a provider outside this set does not
/// round-trip. Adding a new upstream feed means adding a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    Nvd,
    Mitre,
    Ssg,
    Cisa,
    Redhat,
}

impl Provider {
    fn as_str(&self) -> &'static str {
        match self {
            Provider::Nvd => "nvd",
            Provider::Mitre => "mitre",
            Provider::Ssg => "ssg",
            Provider::Cisa => "cisa",
            Provider::Redhat => "redhat",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = UrnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nvd" => Ok(Provider::Nvd),
            "mitre" => Ok(Provider::Mitre),
            "ssg" => Ok(Provider::Ssg),
            "cisa" => Ok(Provider::Cisa),
            "redhat" => Ok(Provider::Redhat),
            other => Err(UrnError::UnknownProvider(other.to_string())),
        }
    }
}

/// The catalog item type named by a URN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    Cve,
    Cwe,
    Capec,
    Attack,
    Ssg,
    Cpe,
}

impl RecordType {
    fn as_str(&self) -> &'static str {
        match self {
            RecordType::Cve => "cve",
            RecordType::Cwe => "cwe",
            RecordType::Capec => "capec",
            RecordType::Attack => "attack",
            RecordType::Ssg => "ssg",
            RecordType::Cpe => "cpe",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = UrnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cve" => Ok(RecordType::Cve),
            "cwe" => Ok(RecordType::Cwe),
            "capec" => Ok(RecordType::Capec),
            "attack" => Ok(RecordType::Attack),
            "ssg" => Ok(RecordType::Ssg),
            "cpe" => Ok(RecordType::Cpe),
            other => Err(UrnError::UnknownType(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Urn
// ---------------------------------------------------------------------------

/// The canonical checkpoint key: `v2e::<provider>::<type>::<atomicId>`.
///
/// Equality is component-wise. `atomicId` is opaque to this module beyond
/// being non-empty — format/semantic validation of the id is the producer's
/// responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Urn {
    pub provider: Provider,
    pub record_type: RecordType,
    pub atomic_id: String,
}

impl Urn {
    pub fn new(
        provider: Provider,
        record_type: RecordType,
        atomic_id: impl Into<String>,
    ) -> Result<Self, UrnError> {
        let atomic_id = atomic_id.into();
        if atomic_id.is_empty() {
            return Err(UrnError::EmptyAtomicId);
        }
        Ok(Self {
            provider,
            record_type,
            atomic_id,
        })
    }

    pub fn parse(s: &str) -> Result<Self, UrnError> {
        let mut parts = s.split(SEP);

        let prefix = parts.next().ok_or(UrnError::Malformed)?;
        if prefix != PREFIX {
            return Err(UrnError::Malformed);
        }

        let provider = parts
            .next()
            .ok_or(UrnError::Malformed)?
            .parse::<Provider>()?;
        let record_type = parts
            .next()
            .ok_or(UrnError::Malformed)?
            .parse::<RecordType>()?;
        let atomic_id = parts.next().ok_or(UrnError::Malformed)?;

        // atomicId may itself legitimately contain literal text, but never
        // the `::` separator — anything left over means the string had more
        // components than the triple permits.
        if parts.next().is_some() {
            return Err(UrnError::Malformed);
        }

        Self::new(provider, record_type, atomic_id)
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{PREFIX}{SEP}{}{SEP}{}{SEP}{}",
            self.provider, self.record_type, self.atomic_id
        )
    }
}

impl FromStr for Urn {
    type Err = UrnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrnError {
    #[error("urn is not of the form v2e::<provider>::<type>::<atomicId>")]
    Malformed,
    #[error("atomicId must be non-empty")]
    EmptyAtomicId,
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),
    #[error("unknown record type '{0}'")]
    UnknownType(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_parse_then_serialize() {
        let s = "v2e::nvd::cve::CVE-2024-12233";
        let urn = Urn::parse(s).unwrap();
        assert_eq!(urn.to_string(), s);
    }

    #[test]
    fn round_trip_serialize_then_parse() {
        let urn = Urn::new(Provider::Mitre, RecordType::Cwe, "CWE-79").unwrap();
        let s = urn.to_string();
        assert_eq!(Urn::parse(&s).unwrap(), urn);
    }

    #[test]
    fn equality_is_componentwise() {
        let a = Urn::new(Provider::Nvd, RecordType::Cve, "CVE-1").unwrap();
        let b = Urn::new(Provider::Nvd, RecordType::Cve, "CVE-1").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_empty_atomic_id() {
        let err = Urn::new(Provider::Nvd, RecordType::Cve, "").unwrap_err();
        assert_eq!(err, UrnError::EmptyAtomicId);
    }

    #[test]
    fn rejects_wrong_prefix() {
        let err = Urn::parse("xyz::nvd::cve::CVE-1").unwrap_err();
        assert_eq!(err, UrnError::Malformed);
    }

    #[test]
    fn rejects_unknown_provider() {
        let err = Urn::parse("v2e::acme::cve::CVE-1").unwrap_err();
        assert_eq!(err, UrnError::UnknownProvider("acme".to_string()));
    }

    #[test]
    fn rejects_unknown_type() {
        let err = Urn::parse("v2e::nvd::zzz::CVE-1").unwrap_err();
        assert_eq!(err, UrnError::UnknownType("zzz".to_string()));
    }

    #[test]
    fn rejects_missing_components() {
        assert!(Urn::parse("v2e::nvd::cve").is_err());
        assert!(Urn::parse("v2e::nvd").is_err());
        assert!(Urn::parse("v2e").is_err());
        assert!(Urn::parse("").is_err());
    }

    #[test]
    fn rejects_extra_components() {
        let err = Urn::parse("v2e::nvd::cve::CVE-1::extra").unwrap_err();
        assert_eq!(err, UrnError::Malformed);
    }

    #[test]
    fn from_str_matches_parse() {
        let s = "v2e::ssg::ssg::RHEL8-rule-1";
        let a: Urn = s.parse().unwrap();
        let b = Urn::parse(s).unwrap();
        assert_eq!(a, b);
    }
}
