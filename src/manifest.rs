//! Module discovery from a backup's `info.xml`.
//!
//! The manifest is a table dump:
//!
//! ```xml
//! <info.xml>
//!   <row table="BackupFileModuleInfo">
//!     <column name="name"><value String="com.tencent.mm"/></column>
//!     <column name="encMsgV3"><value String="…96 hex…"/></column>
//!     <column name="checkMsgV3"><value String="…"/></column>
//!   </row>
//! </info.xml>
//! ```
//!
//! Only `BackupFileModuleInfo` rows are read, and only the three string
//! columns above. Everything else in the file is ignored.

use std::fs;
use std::io;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

const MODULE_TABLE: &str = "BackupFileModuleInfo";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("cannot read manifest: {0}")]
    Io(#[from] io::Error),
    #[error("cannot parse manifest: {0}")]
    Xml(#[from] quick_xml::DeError),
    #[error("manifest has no {MODULE_TABLE} rows")]
    NoModules,
    #[error("{MODULE_TABLE} row {0} has no module name")]
    MissingName(usize),
    #[error("module name '{0}' is not a plain directory name")]
    InvalidName(String),
}

/// One `BackupFileModuleInfo` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    pub name:         String,
    pub enc_msg_v3:   String,
    pub check_msg_v3: String,
}

#[derive(Deserialize)]
struct InfoXml {
    #[serde(rename = "row", default)]
    rows: Vec<Row>,
}

#[derive(Deserialize)]
struct Row {
    #[serde(rename = "@table", default)]
    table:   String,
    #[serde(rename = "column", default)]
    columns: Vec<Column>,
}

#[derive(Deserialize)]
struct Column {
    #[serde(rename = "@name", default)]
    name:  String,
    value: Option<Value>,
}

#[derive(Deserialize)]
struct Value {
    #[serde(rename = "@String")]
    string: Option<String>,
}

impl Row {
    fn string(&self, column: &str) -> String {
        self.columns
            .iter()
            .find(|c| c.name == column)
            .and_then(|c| c.value.as_ref())
            .and_then(|v| v.string.clone())
            .unwrap_or_default()
    }
}

pub fn parse_manifest(xml: &str) -> Result<Vec<ModuleRecord>, ManifestError> {
    let xml = xml.trim_start_matches('\u{feff}');
    let info: InfoXml = quick_xml::de::from_str(xml)?;

    let records = info
        .rows
        .iter()
        .filter(|r| r.table == MODULE_TABLE)
        .enumerate()
        .map(|(i, row)| {
            let name = row.string("name");
            if name.is_empty() {
                return Err(ManifestError::MissingName(i));
            }
            Ok(ModuleRecord {
                name,
                enc_msg_v3:   row.string("encMsgV3"),
                check_msg_v3: row.string("checkMsgV3"),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if records.is_empty() {
        return Err(ManifestError::NoModules);
    }
    Ok(records)
}

pub fn read_manifest<P: AsRef<Path>>(path: P) -> Result<Vec<ModuleRecord>, ManifestError> {
    parse_manifest(&fs::read_to_string(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>
<info.xml>
  <row table="HeaderInfo">
    <column name="backupVersion"><value Integer="3" /></column>
    <column name="autoBackupRandom"><value Null="null" /></column>
  </row>
  <row table="BackupFileModuleInfo">
    <column name="checkMsgV3"><value String="abc_def" /></column>
    <column name="isBundleApp"><value Boolean="false" /></column>
    <column name="name"><value String="com.tencent.mm" /></column>
    <column name="encMsgV3"><value String="00ff" /></column>
    <column name="checkInfo"><value Null="null" /></column>
  </row>
  <row table="BackupFileModuleInfo">
    <column name="name"><value String="com.example.notes" /></column>
    <column name="encMsgV3"><value String="11ee" /></column>
    <column name="checkMsgV3"><value Null="null" /></column>
  </row>
</info.xml>
"#;

    #[test]
    fn reads_module_rows_only() {
        let modules = parse_manifest(SAMPLE).unwrap();
        assert_eq!(
            modules,
            vec![
                ModuleRecord {
                    name:         "com.tencent.mm".into(),
                    enc_msg_v3:   "00ff".into(),
                    check_msg_v3: "abc_def".into(),
                },
                ModuleRecord {
                    name:         "com.example.notes".into(),
                    enc_msg_v3:   "11ee".into(),
                    check_msg_v3: String::new(),
                },
            ]
        );
    }

    #[test]
    fn no_module_rows_is_an_error() {
        let xml = r#"<info.xml><row table="HeaderInfo"><column name="version"><value Integer="1"/></column></row></info.xml>"#;
        assert!(matches!(parse_manifest(xml), Err(ManifestError::NoModules)));
    }

    #[test]
    fn nameless_module_is_an_error() {
        let xml = r#"<info.xml><row table="BackupFileModuleInfo"><column name="encMsgV3"><value String="aa"/></column></row></info.xml>"#;
        assert!(matches!(parse_manifest(xml), Err(ManifestError::MissingName(0))));
    }

    #[test]
    fn broken_xml_is_an_error() {
        assert!(matches!(parse_manifest("<info.xml><row"), Err(ManifestError::Xml(_))));
    }
}
