//! Medication extraction through the MedEx tool.
//!
//! Input: `inputs/medex_input.json`, an object mapping intervention index to
//! the intervention's free text (name followed by description).
//! Output: every file under `outputs/data/` holds one line per mention:
//!
//! ```text
//! <idx>\t<sentence>|<drug>|<brand>|<form>|<strength>|<dose>|<route>|<freq>|<duration>|<necessity>|<umls cui>|<rxcui>|<rxnorm generic>|<generic>
//! ```
//!
//! Field values may carry a trailing `[start,end]` span which is stripped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{IngestError, IngestResult};
use crate::tool::{default_timeout_secs, run_tool, ToolSpec};
use crate::trial::{MedicationMention, Trial};

pub const MEDEX_TOOL: &str = "medex";
const FIELD_COUNT: usize = 14;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedexConfig {
    /// Java classpath holding `org.apache.medex.Main` and its libraries.
    pub classpath: String,
    #[serde(default = "default_java")]
    pub java: String,
    #[serde(default = "default_heap")]
    pub heap: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: Option<u64>,
}

fn default_java() -> String {
    "java".to_string()
}

fn default_heap() -> String {
    "-Xmx1024m".to_string()
}

impl MedexConfig {
    pub fn new(classpath: impl Into<String>) -> Self {
        Self {
            classpath: classpath.into(),
            java: default_java(),
            heap: default_heap(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn tool_spec(&self) -> ToolSpec {
        let mut spec = ToolSpec::new(
            self.java.clone(),
            &[
                self.heap.as_str(),
                "-cp",
                self.classpath.as_str(),
                "org.apache.medex.Main",
                "-i",
                "{input}",
                "-o",
                "{output}",
                "-b",
                "n",
                "-f",
                "y",
                "-d",
                "y",
                "-t",
                "n",
            ],
        );
        spec.timeout_secs = self.timeout_secs;
        spec
    }
}

/// Tool input: intervention index -> text.
pub fn medex_input(trial: &Trial) -> BTreeMap<String, String> {
    trial
        .intervention
        .iter()
        .enumerate()
        .map(|(idx, iv)| {
            let mut text = iv.intervention_name.clone();
            if let Some(desc) = iv.description.as_deref() {
                text.push_str(". ");
                text.push_str(desc);
            }
            (idx.to_string(), text)
        })
        .collect()
}

fn strip_span(field: &str) -> &str {
    let field = field.trim();
    match field.rfind('[') {
        Some(open) if field.ends_with(']') => field[..open].trim_end(),
        _ => field,
    }
}

fn non_empty(field: &str) -> Option<String> {
    let v = strip_span(field);
    (!v.is_empty()).then(|| v.to_string())
}

/// Parse one output line. Lines that do not carry the full field set are
/// rejected; an empty drug name yields `None`.
pub fn parse_medex_line(line: &str) -> IngestResult<Option<MedicationMention>> {
    let malformed = |message: String| IngestError::ToolOutput {
        tool: MEDEX_TOOL.to_string(),
        message,
    };
    let (idx, rest) = line
        .split_once('\t')
        .ok_or_else(|| malformed(format!("missing index column: {line:?}")))?;
    let intervention_idx: usize = idx
        .trim()
        .parse()
        .map_err(|_| malformed(format!("bad intervention index {idx:?}")))?;
    let fields: Vec<&str> = rest.split('|').collect();
    if fields.len() < FIELD_COUNT {
        return Err(malformed(format!(
            "expected {FIELD_COUNT} fields, found {}",
            fields.len()
        )));
    }
    let Some(drug_name) = non_empty(fields[1]) else {
        return Ok(None);
    };
    Ok(Some(MedicationMention {
        intervention_idx,
        drug_name,
        umls_cui: non_empty(fields[10]),
        rxcui: non_empty(fields[11]),
        generic_name: non_empty(fields[13]).or_else(|| non_empty(fields[12])),
    }))
}

/// Parse every output file under `dir` (sorted by file name).
pub fn parse_medex_output(dir: &Path) -> IngestResult<Vec<MedicationMention>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(IngestError::io(dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    let mut mentions = Vec::new();
    for file in files {
        let text = std::fs::read_to_string(&file).map_err(IngestError::io(&file))?;
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            if let Some(m) = parse_medex_line(line)? {
                mentions.push(m);
            }
        }
    }
    Ok(mentions)
}

pub struct MedicationExtractor {
    spec: ToolSpec,
}

impl MedicationExtractor {
    pub fn new(config: &MedexConfig) -> Self {
        Self {
            spec: config.tool_spec(),
        }
    }

    pub fn from_spec(spec: ToolSpec) -> Self {
        Self { spec }
    }

    /// Run the tool over `trial`'s interventions in a scratch directory and
    /// store the mentions on the trial.
    pub fn annotate(&self, trial: &mut Trial) -> IngestResult<()> {
        if trial.intervention.is_empty() {
            trial.medications.clear();
            return Ok(());
        }
        let scratch = tempfile::tempdir().map_err(IngestError::io(std::env::temp_dir()))?;
        let input_dir = scratch.path().join("inputs");
        let output_dir = scratch.path().join("outputs").join("data");
        std::fs::create_dir_all(&input_dir).map_err(IngestError::io(&input_dir))?;
        std::fs::create_dir_all(&output_dir).map_err(IngestError::io(&output_dir))?;

        let input = input_dir.join("medex_input.json");
        let payload = serde_json::to_vec(&medex_input(trial))?;
        std::fs::write(&input, payload).map_err(IngestError::io(&input))?;

        run_tool(&self.spec, &input, &output_dir)?.into_result(MEDEX_TOOL)?;

        let mentions = parse_medex_output(&output_dir)?;
        let valid = trial.intervention.len();
        trial.medications = mentions
            .into_iter()
            .filter(|m| {
                let ok = m.intervention_idx < valid;
                if !ok {
                    tracing::warn!(
                        nct_id = %trial.nct_id,
                        idx = m.intervention_idx,
                        "medication mention for unknown intervention"
                    );
                }
                ok
            })
            .collect();
        tracing::debug!(nct_id = %trial.nct_id, mentions = trial.medications.len(), "medex done");
        Ok(())
    }
}
