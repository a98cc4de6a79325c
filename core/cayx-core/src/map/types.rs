//! JDBC-style column types used by the metadata model.

use serde::{Deserialize, Serialize};

/// Column type of a [`DbAttribute`](super::DbAttribute).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JdbcType {
    Bit,
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Real,
    Double,
    Decimal,
    Numeric,
    Char,
    Varchar,
    LongVarchar,
    Clob,
    NClob,
    Binary,
    VarBinary,
    LongVarBinary,
    Blob,
    Date,
    Time,
    Timestamp,
}

impl JdbcType {
    /// Large object types. Most databases reject `DISTINCT` over these.
    pub fn is_lob(self) -> bool {
        matches!(
            self,
            JdbcType::Blob
                | JdbcType::Clob
                | JdbcType::NClob
                | JdbcType::LongVarchar
                | JdbcType::LongVarBinary
        )
    }

    pub fn is_character(self) -> bool {
        matches!(
            self,
            JdbcType::Char | JdbcType::Varchar | JdbcType::LongVarchar | JdbcType::Clob | JdbcType::NClob
        )
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            JdbcType::TinyInt
                | JdbcType::SmallInt
                | JdbcType::Integer
                | JdbcType::BigInt
                | JdbcType::Float
                | JdbcType::Real
                | JdbcType::Double
                | JdbcType::Decimal
                | JdbcType::Numeric
        )
    }

    /// Types whose DDL declaration takes a length (`VARCHAR(100)`).
    pub fn takes_length(self) -> bool {
        matches!(
            self,
            JdbcType::Char | JdbcType::Varchar | JdbcType::Binary | JdbcType::VarBinary
        )
    }

    /// ANSI type name used by the generic adapter.
    pub fn sql_name(self) -> &'static str {
        match self {
            JdbcType::Bit => "BIT",
            JdbcType::Boolean => "BOOLEAN",
            JdbcType::TinyInt => "TINYINT",
            JdbcType::SmallInt => "SMALLINT",
            JdbcType::Integer => "INTEGER",
            JdbcType::BigInt => "BIGINT",
            JdbcType::Float => "FLOAT",
            JdbcType::Real => "REAL",
            JdbcType::Double => "DOUBLE",
            JdbcType::Decimal => "DECIMAL",
            JdbcType::Numeric => "NUMERIC",
            JdbcType::Char => "CHAR",
            JdbcType::Varchar => "VARCHAR",
            JdbcType::LongVarchar => "LONGVARCHAR",
            JdbcType::Clob => "CLOB",
            JdbcType::NClob => "NCLOB",
            JdbcType::Binary => "BINARY",
            JdbcType::VarBinary => "VARBINARY",
            JdbcType::LongVarBinary => "LONGVARBINARY",
            JdbcType::Blob => "BLOB",
            JdbcType::Date => "DATE",
            JdbcType::Time => "TIME",
            JdbcType::Timestamp => "TIMESTAMP",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lob_types() {
        for t in [
            JdbcType::Blob,
            JdbcType::Clob,
            JdbcType::LongVarchar,
            JdbcType::LongVarBinary,
        ] {
            assert!(t.is_lob(), "{t:?}");
        }
        assert!(!JdbcType::Varchar.is_lob());
        assert!(!JdbcType::BigInt.is_lob());
    }

    #[test]
    fn test_serde_names() {
        let t: JdbcType = serde_json::from_str("\"LONG_VARCHAR\"").unwrap();
        assert_eq!(t, JdbcType::LongVarchar);
        assert_eq!(serde_json::to_string(&JdbcType::BigInt).unwrap(), "\"BIG_INT\"");
    }
}
