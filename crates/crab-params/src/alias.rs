//! Short aliases for dataset-catalog URLs.

const DBS_READER_ALIASES: &[(&str, &str)] = &[
    ("global", "https://cmsweb.cern.ch/dbs/prod/global/DBSReader"),
    ("phys01", "https://cmsweb.cern.ch/dbs/prod/phys01/DBSReader"),
    ("phys02", "https://cmsweb.cern.ch/dbs/prod/phys02/DBSReader"),
    ("phys03", "https://cmsweb.cern.ch/dbs/prod/phys03/DBSReader"),
];

const DBS_WRITER_ALIASES: &[(&str, &str)] = &[
    ("phys01", "https://cmsweb.cern.ch/dbs/prod/phys01/DBSWriter"),
    ("phys02", "https://cmsweb.cern.ch/dbs/prod/phys02/DBSWriter"),
    ("phys03", "https://cmsweb.cern.ch/dbs/prod/phys03/DBSWriter"),
];

fn table(server_name: &str) -> Option<&'static [(&'static str, &'static str)]> {
    match server_name {
        "dbsurl" => Some(DBS_READER_ALIASES),
        "publishdbsurl" => Some(DBS_WRITER_ALIASES),
        _ => None,
    }
}

/// Whether a server parameter accepts aliases.
pub fn has_aliases(server_name: &str) -> bool {
    table(server_name).is_some()
}

/// Alias names accepted by a server parameter.
pub fn known_aliases(server_name: &str) -> Vec<&'static str> {
    table(server_name)
        .map(|t| t.iter().map(|(alias, _)| *alias).collect())
        .unwrap_or_default()
}

/// Resolve an alias to its canonical URL.
///
/// Values that are not aliases (canonical URLs included) come back
/// unchanged.
pub fn resolve_alias<'a>(server_name: &str, value: &'a str) -> &'a str {
    table(server_name)
        .and_then(|t| t.iter().find(|(alias, _)| *alias == value))
        .map(|(_, url)| *url)
        .unwrap_or(value)
}

/// The alias for a canonical URL, if it has one.
pub fn alias_for_url(server_name: &str, url: &str) -> Option<&'static str> {
    let url = url.trim_end_matches('/');
    table(server_name)?
        .iter()
        .find(|(_, canonical)| *canonical == url)
        .map(|(alias, _)| *alias)
}
