//! Volume Naming
//!
//! Canonical storage-volume identity and the object names derived from it.
//!
//! ```text
//! <cluster>-<serial>                    primary data (legacy, unsuffixed)
//! <cluster>-<serial>-wal                write-ahead log
//! <cluster>-<serial>-tbs-<tablespace>   tablespace, '_' written as '.'
//! ```

use crate::error::VolumeError;
use serde::{Deserialize, Serialize};

// =============================================================================
// Constants
// =============================================================================

/// Suffix of write-ahead log volume names
pub const WAL_SUFFIX: &str = "-wal";

/// Separator between instance name and tablespace name
pub const TABLESPACE_INFIX: &str = "-tbs-";

/// Maximum length of a cluster name (DNS-1123 label)
pub const MAX_CLUSTER_NAME_LEN: usize = 63;

/// Maximum length of a tablespace name (PostgreSQL NAMEDATALEN - 1)
pub const MAX_TABLESPACE_NAME_LEN: usize = 63;

// =============================================================================
// Role
// =============================================================================

/// Functional category of a storage volume
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    /// PGDATA; the default and legacy role
    PrimaryData,
    /// Dedicated pg_wal volume
    WriteAheadLog,
    /// Volume backing a named tablespace
    Tablespace(String),
}

impl Role {
    /// Build a tablespace role, validating the tablespace name
    pub fn tablespace(name: impl Into<String>) -> Result<Self, String> {
        let name = name.into();
        validate_tablespace_name(&name)?;
        Ok(Role::Tablespace(name))
    }

    /// Tablespace name when this is a tablespace role
    pub fn tablespace_name(&self) -> Option<&str> {
        match self {
            Role::Tablespace(name) => Some(name),
            _ => None,
        }
    }

    /// Name suffix appended to the instance name
    fn name_suffix(&self) -> String {
        match self {
            Role::PrimaryData => String::new(),
            Role::WriteAheadLog => WAL_SUFFIX.to_string(),
            Role::Tablespace(name) => format!("{}{}", TABLESPACE_INFIX, encode_tablespace(name)),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::PrimaryData => write!(f, "PG_DATA"),
            Role::WriteAheadLog => write!(f, "PG_WAL"),
            Role::Tablespace(name) => write!(f, "PG_TABLESPACE:{}", name),
        }
    }
}

// =============================================================================
// Volume Identity
// =============================================================================

/// Canonical identity of a storage volume within a cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VolumeIdentity {
    pub cluster: String,
    pub serial: u32,
    pub role: Role,
}

impl VolumeIdentity {
    pub fn new(cluster: impl Into<String>, serial: u32, role: Role) -> Self {
        Self {
            cluster: cluster.into(),
            serial,
            role,
        }
    }

    /// Canonical object name
    pub fn name(&self) -> String {
        derive_name(&self.cluster, self.serial, &self.role)
    }

    /// Name of the instance owning this volume
    pub fn instance_name(&self) -> String {
        instance_name(&self.cluster, self.serial)
    }
}

impl std::fmt::Display for VolumeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}/{}", self.cluster, self.serial, self.role)
    }
}

// =============================================================================
// Derivation and Parsing
// =============================================================================

/// Name of the instance with the given serial
pub fn instance_name(cluster: &str, serial: u32) -> String {
    format!("{}-{}", cluster, serial)
}

/// Derive the canonical object name of a volume
pub fn derive_name(cluster: &str, serial: u32, role: &Role) -> String {
    format!("{}{}", instance_name(cluster, serial), role.name_suffix())
}

/// Parse an object name back into its identity
///
/// Patterns are tried WAL first, then tablespace, then the unsuffixed
/// data pattern, which also covers legacy unlabeled volumes.
pub fn parse_name(name: &str) -> Result<VolumeIdentity, VolumeError> {
    if let Some(prefix) = name.strip_suffix(WAL_SUFFIX) {
        if let Ok((cluster, serial)) = split_instance_name(prefix) {
            return Ok(VolumeIdentity::new(cluster, serial, Role::WriteAheadLog));
        }
    }

    if let Some((prefix, encoded)) = name.rsplit_once(TABLESPACE_INFIX) {
        if let (Ok((cluster, serial)), Some(tablespace)) =
            (split_instance_name(prefix), decode_tablespace(encoded))
        {
            return Ok(VolumeIdentity::new(
                cluster,
                serial,
                Role::Tablespace(tablespace),
            ));
        }
    }

    split_instance_name(name)
        .map(|(cluster, serial)| VolumeIdentity::new(cluster, serial, Role::PrimaryData))
        .map_err(|reason| VolumeError::malformed(name, reason))
}

/// Split `<cluster>-<serial>` into its parts
pub fn split_instance_name(name: &str) -> Result<(&str, u32), String> {
    let (cluster, serial) = name
        .rsplit_once('-')
        .ok_or_else(|| format!("{:?} has no serial suffix", name))?;
    validate_cluster_name(cluster)?;
    let serial = parse_serial(serial)?;
    Ok((cluster, serial))
}

/// Parse a canonical decimal serial (positive, no sign, no leading zeros)
pub fn parse_serial(value: &str) -> Result<u32, String> {
    let canonical = !value.is_empty()
        && value.bytes().all(|b| b.is_ascii_digit())
        && !value.starts_with('0');
    if !canonical {
        return Err(format!("serial {:?} is not a positive integer", value));
    }
    value
        .parse::<u32>()
        .map_err(|_| format!("serial {:?} is out of range", value))
}

/// Validate a cluster name as a DNS-1123 label
pub fn validate_cluster_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > MAX_CLUSTER_NAME_LEN {
        return Err(format!(
            "cluster name {:?} must be 1-{} characters",
            name, MAX_CLUSTER_NAME_LEN
        ));
    }
    let valid_chars = name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
    if !valid_chars || name.starts_with('-') || name.ends_with('-') {
        return Err(format!("cluster name {:?} is not a DNS-1123 label", name));
    }
    Ok(())
}

/// Validate a tablespace name (`[a-z_][a-z0-9_]*`)
pub fn validate_tablespace_name(name: &str) -> Result<(), String> {
    if name.is_empty() || name.len() > MAX_TABLESPACE_NAME_LEN {
        return Err(format!(
            "tablespace name {:?} must be 1-{} characters",
            name, MAX_TABLESPACE_NAME_LEN
        ));
    }
    let mut bytes = name.bytes();
    let first_ok = bytes
        .next()
        .map(|b| b.is_ascii_lowercase() || b == b'_')
        .unwrap_or(false);
    let rest_ok = bytes.all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    if !first_ok || !rest_ok {
        return Err(format!("tablespace name {:?} is not a valid identifier", name));
    }
    Ok(())
}

fn encode_tablespace(name: &str) -> String {
    name.replace('_', ".")
}

fn decode_tablespace(encoded: &str) -> Option<String> {
    let name = encoded.replace('.', "_");
    validate_tablespace_name(&name).ok().map(|_| name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn roles() -> Vec<Role> {
        vec![
            Role::PrimaryData,
            Role::WriteAheadLog,
            Role::Tablespace("foo".into()),
            Role::Tablespace("wal".into()),
            Role::Tablespace("tbs".into()),
            Role::Tablespace("_archive_2024".into()),
        ]
    }

    #[test]
    fn test_derive_name() {
        assert_eq!(derive_name("pg", 1, &Role::PrimaryData), "pg-1");
        assert_eq!(derive_name("pg", 2, &Role::WriteAheadLog), "pg-2-wal");
        assert_eq!(
            derive_name("pg", 3, &Role::Tablespace("hot_data".into())),
            "pg-3-tbs-hot.data"
        );
        assert_eq!(instance_name("pg", 7), "pg-7");
    }

    #[test]
    fn test_round_trip() {
        let clusters = ["pg", "a", "pg-main", "x-1", "my-wal", "c-tbs-d", "db-tbs", "9lives"];
        let serials = [1, 2, 10, 99, 4_294_967_295];

        for cluster in clusters {
            for serial in serials {
                for role in roles() {
                    let name = derive_name(cluster, serial, &role);
                    let parsed = parse_name(&name).unwrap();
                    assert_eq!(
                        parsed,
                        VolumeIdentity::new(cluster, serial, role.clone()),
                        "round trip failed for {}",
                        name
                    );
                    assert_eq!(parsed.name(), name);
                }
            }
        }
    }

    #[test]
    fn test_legacy_name_is_primary_data() {
        let identity = parse_name("pg-1").unwrap();
        assert_eq!(identity.cluster, "pg");
        assert_eq!(identity.serial, 1);
        assert_eq!(identity.role, Role::PrimaryData);
    }

    #[test]
    fn test_parse_non_numeric_serial() {
        assert_matches!(
            parse_name("pg-x"),
            Err(VolumeError::MalformedIdentity { name, .. }) if name == "pg-x"
        );
    }

    #[test]
    fn test_parse_rejects_malformed_names() {
        for name in [
            "", "pg", "pg-", "-1", "pg-0", "pg-01", "pg-+1", "PG-1", "pg-1-WAL",
            "pg-4294967296", "pg_x-1", "pg-1-tbs-", "pg-1-tbs-9x",
        ] {
            assert_matches!(
                parse_name(name),
                Err(VolumeError::MalformedIdentity { .. }),
                "{:?} should not parse",
                name
            );
        }
    }

    #[test]
    fn test_tablespace_named_wal_is_not_wal() {
        let identity = parse_name("pg-1-tbs-wal").unwrap();
        assert_eq!(identity.role, Role::Tablespace("wal".into()));
    }

    #[test]
    fn test_cluster_containing_infix_parses_as_data() {
        let identity = parse_name("a-tbs-1").unwrap();
        assert_eq!(identity.cluster, "a-tbs");
        assert_eq!(identity.role, Role::PrimaryData);
    }

    #[test]
    fn test_tablespace_validation() {
        assert!(Role::tablespace("hot_data").is_ok());
        assert!(Role::tablespace("_x").is_ok());
        assert!(Role::tablespace("").is_err());
        assert!(Role::tablespace("9lives").is_err());
        assert!(Role::tablespace("with-dash").is_err());
        assert!(Role::tablespace("Upper").is_err());
        assert!(Role::tablespace("a".repeat(64)).is_err());
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::PrimaryData.to_string(), "PG_DATA");
        assert_eq!(Role::WriteAheadLog.to_string(), "PG_WAL");
        assert_eq!(Role::Tablespace("foo".into()).to_string(), "PG_TABLESPACE:foo");
    }
}
