//! Cross-parameter rules.

use std::ops::RangeInclusive;
use std::path::Path;

use crab_protocol::lumi::parse_run_range;
use crab_protocol::ServerInstance;
use regex_lite::Regex;

use super::ValidationError;
use crate::config::TaskConfiguration;
use crate::jobtype;

const SPLITTING_ALGORITHMS: &[&str] = &[
    "FileBased",
    "LumiBased",
    "EventAwareLumiBased",
    "EventBased",
    "Automatic",
];

/// Target job runtime, in minutes, accepted with `Automatic` splitting.
const AUTOMATIC_RUNTIME_MINUTES: RangeInclusive<i64> = 180..=2700;

const CORES: RangeInclusive<i64> = 1..=8;
const MEMORY_FLOOR_MB: i64 = 5000;
const MEMORY_PER_CORE_MB: i64 = 2500;

const LFN_PREFIXES: &[&str] = &["/store/user/", "/store/group/"];
const REQUEST_NAME_PATTERN: &str = r"^[A-Za-z0-9_-]{1,100}$";

/// Parameters naming local files that must exist.
const FILE_PARAMETERS: &[&str] = &["JobType.scriptExe", "JobType.psetName", "Data.lumiMask"];

pub(super) fn check(config: &TaskConfiguration, base_dir: &Path, issues: &mut Vec<ValidationError>) {
    check_instance(config, issues);
    check_job_type(config, issues);
    check_splitting(config, issues);
    check_resources(config, issues);
    check_output(config, issues);
    check_files(config, base_dir, issues);
    check_names(config, issues);
}

fn check_instance(config: &TaskConfiguration, issues: &mut Vec<ValidationError>) {
    let name = config.get_str("General.instance").unwrap_or("prod");
    if let Err(e) = ServerInstance::resolve(
        name,
        config.get_str("General.restHost"),
        config.get_str("General.dbInstance"),
    ) {
        issues.push(ValidationError::invalid("General.instance", e.to_string()));
    }
}

fn check_job_type(config: &TaskConfiguration, issues: &mut Vec<ValidationError>) {
    let Some(name) = config.get_str("JobType.pluginName") else {
        return;
    };
    match jobtype::create(name) {
        Some(plugin) => plugin.check(config, issues),
        None => issues.push(ValidationError::invalid(
            "JobType.pluginName",
            format!(
                "unknown job type '{}' (expected one of: {})",
                name,
                jobtype::names().collect::<Vec<_>>().join(", ")
            ),
        )),
    }
}

fn check_splitting(config: &TaskConfiguration, issues: &mut Vec<ValidationError>) {
    let Some(algorithm) = config.get_str("Data.splitting") else {
        return;
    };
    if !SPLITTING_ALGORITHMS.contains(&algorithm) {
        issues.push(ValidationError::invalid(
            "Data.splitting",
            format!(
                "unknown splitting algorithm '{}' (expected one of: {})",
                algorithm,
                SPLITTING_ALGORITHMS.join(", ")
            ),
        ));
        return;
    }

    if algorithm == "Automatic" {
        if config.contains("JobType.maxJobRuntimeMin") {
            issues.push(ValidationError::invalid(
                "JobType.maxJobRuntimeMin",
                "cannot be set with Automatic splitting",
            ));
        }
        if let Some(minutes) = config.get_int("Data.unitsPerJob") {
            if !AUTOMATIC_RUNTIME_MINUTES.contains(&minutes) {
                issues.push(ValidationError::invalid(
                    "Data.unitsPerJob",
                    format!(
                        "with Automatic splitting this is the target runtime in minutes and must be between {} and {}",
                        AUTOMATIC_RUNTIME_MINUTES.start(),
                        AUTOMATIC_RUNTIME_MINUTES.end()
                    ),
                ));
            }
        }
    }

    if config.contains("Data.inputDataset") && config.contains("Data.outputPrimaryDataset") {
        issues.push(ValidationError::Conflict {
            first: "Data.inputDataset",
            second: "Data.outputPrimaryDataset",
        });
    }

    if let Some(range) = config.get_str("Data.runRange") {
        if let Err(e) = parse_run_range(range) {
            issues.push(ValidationError::invalid("Data.runRange", e.to_string()));
        }
    }
}

fn check_resources(config: &TaskConfiguration, issues: &mut Vec<ValidationError>) {
    let cores = config.get_int("JobType.numCores").unwrap_or(1);
    if !CORES.contains(&cores) {
        issues.push(ValidationError::invalid(
            "JobType.numCores",
            format!("must be between {} and {}", CORES.start(), CORES.end()),
        ));
        return;
    }

    if let Some(memory) = config.get_int("JobType.maxMemoryMB") {
        let ceiling = MEMORY_FLOOR_MB.max(MEMORY_PER_CORE_MB * cores);
        if memory > ceiling {
            issues.push(ValidationError::invalid(
                "JobType.maxMemoryMB",
                format!("{} MB exceeds the {} MB allowed for {} core(s)", memory, ceiling, cores),
            ));
        }
    }
}

fn check_output(config: &TaskConfiguration, issues: &mut Vec<ValidationError>) {
    let outputs = config.get_bool("General.transferOutputs").unwrap_or(true);
    let logs = config.get_bool("General.transferLogs").unwrap_or(true);
    if (outputs || logs) && !config.contains("Site.storageSite") {
        issues.push(ValidationError::invalid(
            "Site.storageSite",
            "required when General.transferOutputs or General.transferLogs is true",
        ));
    }

    if let Some(base) = config.get_str("Data.outLFNDirBase") {
        if !LFN_PREFIXES.iter().any(|prefix| base.starts_with(prefix)) {
            issues.push(ValidationError::invalid(
                "Data.outLFNDirBase",
                format!("'{}' must start with {}", base, LFN_PREFIXES.join(" or ")),
            ));
        }
    }
}

fn check_files(config: &TaskConfiguration, base_dir: &Path, issues: &mut Vec<ValidationError>) {
    for param in FILE_PARAMETERS {
        if let Some(file) = config.get_str(param) {
            let path = base_dir.join(file);
            if !path.is_file() {
                issues.push(ValidationError::MissingFile {
                    path: param.to_string(),
                    file: path,
                });
            }
        }
    }
}

fn check_names(config: &TaskConfiguration, issues: &mut Vec<ValidationError>) {
    if let Some(name) = config.get_str("General.requestName") {
        let valid = Regex::new(REQUEST_NAME_PATTERN).is_ok_and(|re| re.is_match(name));
        if !valid {
            issues.push(ValidationError::invalid(
                "General.requestName",
                format!(
                    "'{}' must be 1 to 100 letters, digits, underscores or dashes",
                    name
                ),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn analysis() -> TaskConfiguration {
        let mut config = TaskConfiguration::new();
        config.set("General.requestName", "ana_1").unwrap();
        config.set("JobType.pluginName", "Analysis").unwrap();
        config.set("Data.inputDataset", "/A/B/MINIAOD").unwrap();
        config.set("Data.splitting", "FileBased").unwrap();
        config.set("Data.unitsPerJob", 5).unwrap();
        config.set("Site.storageSite", "T2_CH_CERN").unwrap();
        config
    }

    fn run(config: &TaskConfiguration) -> Vec<ValidationError> {
        let mut issues = Vec::new();
        check(config, Path::new("/nonexistent"), &mut issues);
        issues
    }

    fn only(issues: &[ValidationError], path: &str) -> bool {
        issues.len() == 1 && issues[0].mentions(path)
    }

    #[test]
    fn test_clean_analysis() {
        assert!(run(&analysis()).is_empty());
    }

    #[test]
    fn test_unknown_splitting() {
        let mut config = analysis();
        config.set("Data.splitting", "ByMagic").unwrap();
        assert!(only(&run(&config), "Data.splitting"));
    }

    #[test]
    fn test_automatic_limits() {
        let mut config = analysis();
        config.set("Data.splitting", "Automatic").unwrap();
        config.set("Data.unitsPerJob", 100).unwrap();
        assert!(only(&run(&config), "Data.unitsPerJob"));

        config.set("Data.unitsPerJob", 180).unwrap();
        config.set("JobType.maxJobRuntimeMin", 600).unwrap();
        assert!(only(&run(&config), "JobType.maxJobRuntimeMin"));

        config.unset("JobType.maxJobRuntimeMin");
        config.set("Data.unitsPerJob", 2700).unwrap();
        assert!(run(&config).is_empty());
    }

    #[test]
    fn test_dataset_conflict() {
        let mut config = analysis();
        config.set("Data.outputPrimaryDataset", "Gen").unwrap();
        let issues = run(&config);
        assert!(issues.contains(&ValidationError::Conflict {
            first: "Data.inputDataset",
            second: "Data.outputPrimaryDataset",
        }));
    }

    #[test]
    fn test_memory_scales_with_cores() {
        let mut config = analysis();
        config.set("JobType.maxMemoryMB", 5000).unwrap();
        assert!(run(&config).is_empty());

        config.set("JobType.maxMemoryMB", 5001).unwrap();
        assert!(only(&run(&config), "JobType.maxMemoryMB"));

        config.set("JobType.numCores", 4).unwrap();
        config.set("JobType.maxMemoryMB", 10000).unwrap();
        assert!(run(&config).is_empty());

        config.set("JobType.numCores", 9).unwrap();
        assert!(only(&run(&config), "JobType.numCores"));
    }

    #[test]
    fn test_storage_site_needed_unless_nothing_transferred() {
        let mut config = analysis();
        config.unset("Site.storageSite");
        assert!(only(&run(&config), "Site.storageSite"));

        config.set("General.transferOutputs", false).unwrap();
        assert!(only(&run(&config), "Site.storageSite"));

        config.set("General.transferLogs", false).unwrap();
        assert!(run(&config).is_empty());
    }

    #[test]
    fn test_files_must_exist() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("run.sh"), "#!/bin/sh\n").unwrap();

        let mut config = analysis();
        config.set("JobType.scriptExe", "run.sh").unwrap();
        config.set("Data.lumiMask", "mask.json").unwrap();

        let mut issues = Vec::new();
        check(&config, dir.path(), &mut issues);
        assert!(only(&issues, "Data.lumiMask"));
    }

    #[test]
    fn test_request_name_and_lfn() {
        let mut config = analysis();
        config.set("General.requestName", "has space").unwrap();
        assert!(only(&run(&config), "General.requestName"));

        config.set("General.requestName", "a".repeat(101)).unwrap();
        assert!(only(&run(&config), "General.requestName"));

        config.set("General.requestName", "ok-name_2").unwrap();
        config.set("Data.outLFNDirBase", "/store/data/x").unwrap();
        assert!(only(&run(&config), "Data.outLFNDirBase"));

        config.set("Data.outLFNDirBase", "/store/group/higgs").unwrap();
        assert!(run(&config).is_empty());
    }

    #[test]
    fn test_instance_other_needs_host() {
        let mut config = analysis();
        config.set("General.instance", "other").unwrap();
        assert!(only(&run(&config), "General.instance"));

        config.set("General.restHost", "crab.example.org").unwrap();
        config.set("General.dbInstance", "dev").unwrap();
        assert!(run(&config).is_empty());
    }

    #[test]
    fn test_unknown_job_type() {
        let mut config = analysis();
        config.set("JobType.pluginName", "Reco").unwrap();
        assert!(only(&run(&config), "JobType.pluginName"));
    }

    #[test]
    fn test_bad_run_range() {
        let mut config = analysis();
        config.set("Data.runRange", "5-1").unwrap();
        assert!(only(&run(&config), "Data.runRange"));
    }
}
