//! The local VOMS proxy.

use tracing::{debug, info, warn};

use super::{
    CredentialError, CredentialManager, CredentialRecord, LocalProxyState, MismatchPolicy,
    ToolCommand, VO,
};

const INFO_TOOL: &str = "voms-proxy-info";
const INIT_TOOL: &str = "voms-proxy-init";

/// Classify an inspected proxy against the requested attributes.
pub fn classify(
    record: Option<&CredentialRecord>,
    threshold_seconds: u64,
    group: &str,
    role: &str,
) -> LocalProxyState {
    match record {
        None => LocalProxyState::Absent,
        Some(r) if r.time_left < threshold_seconds => LocalProxyState::Expired,
        Some(r) if r.group != group || r.role != role => LocalProxyState::ValidWrongAttrs,
        Some(_) => LocalProxyState::ValidOk,
    }
}

/// Group and role of the primary FQAN, e.g. `/cms/becms/Role=production/Capability=NULL`
/// gives `("becms", "production")`. `NULL` roles come back empty.
pub fn parse_fqan(fqan: &str) -> (String, String) {
    let mut group = Vec::new();
    let mut role = String::new();
    for part in fqan.trim().split('/').filter(|p| !p.is_empty()) {
        if let Some(value) = part.strip_prefix("Role=") {
            if value != "NULL" {
                role = value.to_string();
            }
        } else if part.starts_with("Capability=") {
            continue;
        } else {
            group.push(part);
        }
    }
    // The first component is the VO itself.
    let group = group.get(1..).map(|g| g.join("/")).unwrap_or_default();
    (group, role)
}

/// Remove the trailing numeric `CN=` components a proxy adds to the DN.
pub fn strip_proxy_cns(identity: &str) -> String {
    let mut dn = identity.trim();
    loop {
        match dn.rsplit_once("/CN=") {
            Some((head, tail)) if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) => {
                dn = head;
            }
            Some((head, "proxy")) | Some((head, "limited proxy")) => dn = head,
            _ => break,
        }
    }
    dn.to_string()
}

fn voms_argument(group: &str, role: &str) -> String {
    let mut arg = VO.to_string();
    if !group.is_empty() || !role.is_empty() {
        arg.push_str(":/");
        arg.push_str(VO);
        if !group.is_empty() {
            arg.push('/');
            arg.push_str(group);
        }
        if !role.is_empty() {
            arg.push_str("/Role=");
            arg.push_str(role);
        }
    }
    arg
}

impl CredentialManager<'_> {
    fn info_command(&self, flag: &str) -> ToolCommand {
        ToolCommand::new(INFO_TOOL)
            .arg("--file")
            .arg(self.env.proxy_path.display().to_string())
            .arg(flag)
    }

    /// Inspect the configured proxy file. `None` when there is none.
    pub fn inspect_local_proxy(&self) -> Result<Option<CredentialRecord>, CredentialError> {
        let path = &self.env.proxy_path;
        if !path.is_file() {
            debug!(path = %path.display(), "no proxy file");
            return Ok(None);
        }

        let timeleft = self.runner.run(&self.info_command("--timeleft"))?;
        let time_left = if timeleft.success() {
            timeleft.stdout.trim().parse::<i64>().map_err(|_| {
                CredentialError::UnexpectedOutput {
                    program: INFO_TOOL.into(),
                    output: timeleft.stdout.trim().to_string(),
                }
            })?
        } else {
            0
        };

        let mut record = CredentialRecord {
            path: path.clone(),
            dn: String::new(),
            group: String::new(),
            role: String::new(),
            time_left: time_left.max(0) as u64,
        };
        if record.time_left == 0 {
            return Ok(Some(record));
        }

        let identity = self.run_checked(&self.info_command("--identity"))?;
        record.dn = strip_proxy_cns(&identity.stdout);

        let fqan = self.runner.run(&self.info_command("--fqan"))?;
        match fqan.stdout.lines().find(|l| !l.trim().is_empty()) {
            Some(primary) if fqan.success() => {
                let (group, role) = parse_fqan(primary);
                record.group = group;
                record.role = role;
            }
            // No VOMS extension: unusable for the server.
            _ => record.time_left = 0,
        }

        Ok(Some(record))
    }

    /// Make sure a proxy with at least `threshold_seconds` left and the
    /// requested VO attributes exists, creating one when needed.
    pub fn ensure_local_proxy(
        &self,
        threshold_seconds: u64,
        group: &str,
        role: &str,
        policy: MismatchPolicy,
    ) -> Result<CredentialRecord, CredentialError> {
        let current = self.inspect_local_proxy()?;
        let state = classify(current.as_ref(), threshold_seconds, group, role);
        debug!(?state, "local proxy inspected");

        match (state, current) {
            (LocalProxyState::ValidOk, Some(record)) => {
                info!(time_left = record.time_left, "using existing proxy");
                return Ok(record);
            }
            (LocalProxyState::ValidWrongAttrs, Some(record)) => match policy {
                MismatchPolicy::Keep => {
                    warn!(
                        group = %record.group,
                        role = %record.role,
                        "keeping proxy with different VO attributes"
                    );
                    return Ok(record);
                }
                MismatchPolicy::Fail => {
                    return Err(CredentialError::AttributeMismatch {
                        path: record.path,
                        group: group.to_string(),
                        role: role.to_string(),
                        found_group: record.group,
                        found_role: record.role,
                    });
                }
                MismatchPolicy::Overwrite => {
                    warn!("replacing proxy with different VO attributes");
                }
            },
            _ => {}
        }

        self.create_proxy(group, role)?;

        let record = self
            .inspect_local_proxy()?
            .ok_or_else(|| CredentialError::UnexpectedOutput {
                program: INIT_TOOL.into(),
                output: "no proxy file after creation".into(),
            })?;
        if record.time_left < threshold_seconds {
            return Err(CredentialError::ProxyTooShort {
                time_left: record.time_left,
                threshold: threshold_seconds,
            });
        }
        info!(time_left = record.time_left, "created new proxy");
        Ok(record)
    }

    fn create_proxy(&self, group: &str, role: &str) -> Result<(), CredentialError> {
        self.env.require_user_credentials()?;

        let command = ToolCommand::new(INIT_TOOL)
            .arg("--voms")
            .arg(voms_argument(group, role))
            .arg("--valid")
            .arg(format!("{}:00", self.proxy_validity_hours))
            .arg("--rfc")
            .arg("--cert")
            .arg(self.env.user_cert.display().to_string())
            .arg("--key")
            .arg(self.env.user_key.display().to_string())
            .arg("--out")
            .arg(self.env.proxy_path.display().to_string())
            .interactive();

        info!("creating proxy for {}", voms_argument(group, role));
        self.run_checked(&command)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(time_left: u64, group: &str, role: &str) -> CredentialRecord {
        CredentialRecord {
            path: PathBuf::from("/tmp/x509up_u1"),
            dn: "/DC=ch/CN=user".into(),
            group: group.into(),
            role: role.into(),
            time_left,
        }
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(None, 720, "", ""), LocalProxyState::Absent);
        assert_eq!(
            classify(Some(&record(100, "", "")), 720, "", ""),
            LocalProxyState::Expired
        );
        assert_eq!(
            classify(Some(&record(5000, "becms", "")), 720, "", ""),
            LocalProxyState::ValidWrongAttrs
        );
        assert_eq!(
            classify(Some(&record(5000, "", "")), 720, "", ""),
            LocalProxyState::ValidOk
        );
    }

    #[test]
    fn test_parse_fqan() {
        assert_eq!(
            parse_fqan("/cms/Role=NULL/Capability=NULL"),
            (String::new(), String::new())
        );
        assert_eq!(
            parse_fqan("/cms/becms/Role=production/Capability=NULL"),
            ("becms".to_string(), "production".to_string())
        );
        assert_eq!(
            parse_fqan("/cms/uscms/escience/Role=NULL/Capability=NULL"),
            ("uscms/escience".to_string(), String::new())
        );
    }

    #[test]
    fn test_strip_proxy_cns() {
        assert_eq!(
            strip_proxy_cns("/DC=ch/DC=cern/CN=Jo User/CN=12345/CN=67890\n"),
            "/DC=ch/DC=cern/CN=Jo User"
        );
        assert_eq!(strip_proxy_cns("/DC=ch/CN=user/CN=proxy"), "/DC=ch/CN=user");
    }

    #[test]
    fn test_voms_argument() {
        assert_eq!(voms_argument("", ""), "cms");
        assert_eq!(voms_argument("becms", ""), "cms:/cms/becms");
        assert_eq!(voms_argument("", "priority"), "cms:/cms/Role=priority");
        assert_eq!(voms_argument("becms", "t1access"), "cms:/cms/becms/Role=t1access");
    }
}
