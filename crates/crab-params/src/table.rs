//! The parameter tables.

use crate::{ClientParameter, ParamDefault, ParamType, RenamedParameter, ServerParameter};

use ParamDefault::{Bool, EmptyList, Str};
use ParamType::{Dict, Int, List, String as Text};

const fn server(
    server_name: &'static str,
    config: &'static [&'static str],
    kind: ParamType,
    default: Option<ParamDefault>,
) -> ServerParameter {
    ServerParameter {
        server_name,
        default,
        config,
        kind,
        required: false,
    }
}

const fn required(
    server_name: &'static str,
    config: &'static [&'static str],
    kind: ParamType,
) -> ServerParameter {
    ServerParameter {
        server_name,
        default: None,
        config,
        kind,
        required: true,
    }
}

const fn client(path: &'static str, kind: ParamType) -> ClientParameter {
    ClientParameter { path, kind }
}

/// Parameters translated into the submission request.
pub const SERVER_PARAMETERS: &[ServerParameter] = &[
    // General
    server("workflow", &["General.requestName"], Text, None),
    server("activity", &["General.activity"], Text, None),
    server("saveoutput", &["General.transferOutputs"], ParamType::Bool, Some(Bool(true))),
    server("savelogsflag", &["General.transferLogs"], ParamType::Bool, Some(Bool(true))),
    server("faillimit", &["General.failureLimit"], Int, None),
    // JobType
    required("jobtype", &["JobType.pluginName"], Text),
    server("generator", &["JobType.generator"], Text, Some(Str("pythia"))),
    server("eventsperlumi", &["JobType.eventsPerLumi"], Int, None),
    server("adduserfiles", &["JobType.inputFiles"], List, Some(EmptyList)),
    server("addoutputfiles", &["JobType.outputFiles"], List, Some(EmptyList)),
    server("maxjobruntime", &["JobType.maxJobRuntimeMin"], Int, None),
    server("numcores", &["JobType.numCores"], Int, None),
    server("maxmemory", &["JobType.maxMemoryMB"], Int, None),
    server("priority", &["JobType.priority"], Int, None),
    server("nonprodsw", &["JobType.allowUndistributedCMSSW"], ParamType::Bool, Some(Bool(false))),
    server("scriptexe", &["JobType.scriptExe"], Text, None),
    server("scriptargs", &["JobType.scriptArgs"], List, Some(EmptyList)),
    server("requireaccelerator", &["JobType.requireAccelerator"], ParamType::Bool, Some(Bool(false))),
    server("acceleratorparams", &["JobType.acceleratorParams"], Dict, None),
    // Data
    server("inputdata", &["Data.inputDataset"], Text, None),
    server("primarydataset", &["Data.outputPrimaryDataset"], Text, None),
    server("userfiles", &["Data.userInputFiles"], List, Some(EmptyList)),
    server("nonvaliddata", &["Data.allowNonValidInputDataset"], ParamType::Bool, Some(Bool(false))),
    server("dbsurl", &["Data.inputDBS"], Text, Some(Str("global"))),
    server("publishdbsurl", &["Data.publishDBS"], Text, Some(Str("phys03"))),
    server("publishname", &["Data.outputDatasetTag"], Text, None),
    server("publication", &["Data.publication"], ParamType::Bool, Some(Bool(true))),
    required("splitalgo", &["Data.splitting"], Text),
    required("algoargs", &["Data.unitsPerJob"], Int),
    server("totalunits", &["Data.totalUnits"], Int, Some(ParamDefault::Int(0))),
    server("lfn", &["Data.outLFNDirBase"], Text, None),
    server("ignorelocality", &["Data.ignoreLocality"], ParamType::Bool, Some(Bool(false))),
    server("inputblocks", &["Data.inputBlocks"], List, Some(EmptyList)),
    server("secondarydata", &["Data.secondaryInputDataset"], Text, None),
    server("useparent", &["Data.useParent"], ParamType::Bool, Some(Bool(false))),
    server("publishgroupname", &["Data.publishWithGroupName"], ParamType::Bool, Some(Bool(false))),
    server("partialdataset", &["Data.partialDataset"], ParamType::Bool, Some(Bool(false))),
    // Site
    server("asyncdest", &["Site.storageSite"], Text, None),
    server("sitewhitelist", &["Site.whitelist"], List, Some(EmptyList)),
    server("siteblacklist", &["Site.blacklist"], List, Some(EmptyList)),
    server("ignoreglobalblacklist", &["Site.ignoreGlobalBlacklist"], ParamType::Bool, Some(Bool(false))),
    // User
    server("vorole", &["User.voRole"], Text, None),
    server("vogroup", &["User.voGroup"], Text, None),
    // Debug
    server("oneEventMode", &["Debug.oneEventMode"], ParamType::Bool, Some(Bool(false))),
    server("scheddname", &["Debug.scheddName"], Text, None),
    server("collector", &["Debug.collector"], Text, None),
    server("extrajdl", &["Debug.extraJDL"], List, Some(EmptyList)),
];

/// Parameters the client consumes itself.
pub const CLIENT_PARAMETERS: &[ClientParameter] = &[
    client("General.workArea", Text),
    client("General.instance", Text),
    client("General.restHost", Text),
    client("General.dbInstance", Text),
    client("JobType.psetName", Text),
    client("JobType.pyCfgParams", List),
    client("JobType.sendPythonFolder", ParamType::Bool),
    client("JobType.sendExternalFolder", ParamType::Bool),
    client("JobType.disableAutomaticOutputCollection", ParamType::Bool),
    client("Data.lumiMask", Text),
    client("Data.runRange", Text),
];

/// Names that no longer exist, with their replacements.
pub const RENAMED_PARAMETERS: &[RenamedParameter] = &[
    RenamedParameter { old: "General.saveLogs", new: "General.transferLogs" },
    RenamedParameter { old: "General.transferOutput", new: "General.transferOutputs" },
    RenamedParameter { old: "General.serverUrl", new: "General.instance" },
    RenamedParameter { old: "JobType.allowNonProductionCMSSW", new: "JobType.allowUndistributedCMSSW" },
    RenamedParameter { old: "Data.primaryDataset", new: "Data.outputPrimaryDataset" },
    RenamedParameter { old: "Data.publishDataName", new: "Data.outputDatasetTag" },
    RenamedParameter { old: "Data.publishDbsUrl", new: "Data.publishDBS" },
    RenamedParameter { old: "Data.dbsUrl", new: "Data.inputDBS" },
    RenamedParameter { old: "Data.outlfn", new: "Data.outLFNDirBase" },
];
