//! Eligibility criteria normalization through Criteria2Query.
//!
//! The tool reads the raw criteria text from `inputs/crit_input.txt` and
//! writes `output.json` into its output directory:
//!
//! ```json
//! {"inclusion_criteria": [{"sents": [{"text": "...", "terms": [
//!     {"text": "stable angina", "categorey": "Condition", "neg": false, "cui": "C0340288"}
//! ]}]}],
//!  "exclusion_criteria": [...]}
//! ```
//!
//! (`categorey` is the tool's own spelling; `category` is accepted too.)

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{IngestError, IngestResult};
use crate::tool::{default_timeout_secs, run_tool, ToolSpec};
use crate::trial::{EligibilityCriterion, Trial};

pub const CRITERIA_TOOL: &str = "criteria2query";
pub const CRITERIA_OUTPUT_FILE: &str = "output.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriteriaConfig {
    pub jar: String,
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
    "-Xmx4096m".to_string()
}

impl CriteriaConfig {
    pub fn new(jar: impl Into<String>) -> Self {
        Self {
            jar: jar.into(),
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
                "-jar",
                self.jar.as_str(),
                "--input",
                "{input}",
                "--outputDir",
                "{output}",
            ],
        );
        spec.timeout_secs = self.timeout_secs;
        spec
    }
}

// ============================================================================
// Output format
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct CriteriaOutput {
    #[serde(default)]
    inclusion_criteria: Vec<CriteriaBlock>,
    #[serde(default)]
    exclusion_criteria: Vec<CriteriaBlock>,
}

#[derive(Debug, Default, Deserialize)]
struct CriteriaBlock {
    #[serde(default)]
    sents: Vec<Sentence>,
}

#[derive(Debug, Default, Deserialize)]
struct Sentence {
    #[serde(default)]
    terms: Vec<Term>,
}

#[derive(Debug, Default, Deserialize)]
struct Term {
    #[serde(default)]
    text: String,
    #[serde(default, alias = "categorey")]
    category: String,
    #[serde(default)]
    neg: bool,
    #[serde(default, alias = "cui")]
    concept_id: Option<String>,
}

fn flatten(blocks: Vec<CriteriaBlock>, inclusion: bool, out: &mut Vec<EligibilityCriterion>) {
    let terms = blocks
        .into_iter()
        .flat_map(|b| b.sents)
        .flat_map(|s| s.terms)
        .filter(|t| !t.text.trim().is_empty());
    out.extend(terms.map(|t| EligibilityCriterion {
        category: t.category,
        inclusion,
        text: t.text,
        negated: t.neg,
        concept_id: t.concept_id.filter(|c| !c.is_empty()),
    }));
}

/// Parse Criteria2Query output: inclusion terms first, then exclusion terms.
pub fn parse_criteria_output(json: &str) -> IngestResult<Vec<EligibilityCriterion>> {
    let output: CriteriaOutput =
        serde_json::from_str(json).map_err(|e| IngestError::ToolOutput {
            tool: CRITERIA_TOOL.to_string(),
            message: e.to_string(),
        })?;
    let mut out = Vec::new();
    flatten(output.inclusion_criteria, true, &mut out);
    flatten(output.exclusion_criteria, false, &mut out);
    Ok(out)
}

pub struct CriteriaParser {
    spec: ToolSpec,
}

impl CriteriaParser {
    pub fn new(config: &CriteriaConfig) -> Self {
        Self {
            spec: config.tool_spec(),
        }
    }

    pub fn from_spec(spec: ToolSpec) -> Self {
        Self { spec }
    }

    /// Normalize `trial.eligibility_criteria` into `trial.eligibility_concepts`.
    /// A trial without criteria text gets an empty list without running the tool.
    pub fn annotate(&self, trial: &mut Trial) -> IngestResult<()> {
        let Some(text) = trial
            .eligibility_criteria
            .as_deref()
            .filter(|t| !t.trim().is_empty())
        else {
            trial.eligibility_concepts.clear();
            return Ok(());
        };

        let scratch = tempfile::tempdir().map_err(IngestError::io(std::env::temp_dir()))?;
        let input_dir = scratch.path().join("inputs");
        let output_dir = scratch.path().join("outputs").join("data");
        std::fs::create_dir_all(&input_dir).map_err(IngestError::io(&input_dir))?;
        std::fs::create_dir_all(&output_dir).map_err(IngestError::io(&output_dir))?;

        let input = input_dir.join("crit_input.txt");
        std::fs::write(&input, text).map_err(IngestError::io(&input))?;

        run_tool(&self.spec, &input, &output_dir)?.into_result(CRITERIA_TOOL)?;

        let output = output_dir.join(CRITERIA_OUTPUT_FILE);
        let json = std::fs::read_to_string(&output).map_err(IngestError::io(&output))?;
        trial.eligibility_concepts = parse_criteria_output(&json)?;
        tracing::debug!(
            nct_id = %trial.nct_id,
            criteria = trial.eligibility_concepts.len(),
            "criteria normalized"
        );
        Ok(())
    }
}

/// Read a previously produced output file.
pub fn read_criteria_output(path: &Path) -> IngestResult<Vec<EligibilityCriterion>> {
    let json = std::fs::read_to_string(path).map_err(IngestError::io(path))?;
    parse_criteria_output(&json)
}
