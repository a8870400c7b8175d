//! Parameter sets, their canonical identifiers, and artifact-name parsing.
//!
//! Every output file of a trial embeds the trial's identifier, e.g.
//!
//! ```text
//! 5Annuli_4Subsections_1Movement_NoneSpectrum_1Smooth_TrueHighpass_
//! ```
//!
//! [`ParameterSet`]'s `Display` impl is the only formatter of that string and
//! [`ParameterSet::from_identifier`] the only parser, so the two can never
//! drift apart. [`ArtifactName::parse`] recovers both the parameter set and
//! the basis count from any file the sweep writes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Fourier cutoff used when the highpass switch is simply "on".
pub const DEFAULT_HIGHPASS_CUTOFF: f64 = 10.0;

/// Spectral template string used when no template is selected.
pub const NO_TEMPLATE: &str = "None";

const FIELD_SUFFIXES: [&str; 6] = [
    "Annuli",
    "Subsections",
    "Movement",
    "Spectrum",
    "Smooth",
    "Highpass",
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IdentifierError {
    #[error("Identifier '{0}' must end with '_'")]
    MissingTerminator(String),

    #[error("Identifier '{identifier}' has {found} fields, expected {expected}")]
    WrongFieldCount {
        identifier: String,
        found: usize,
        expected: usize,
    },

    #[error("Field '{field}' does not end with '{suffix}'")]
    MissingSuffix { field: String, suffix: &'static str },

    #[error("Cannot parse {what} from '{value}'")]
    InvalidValue { what: &'static str, value: String },

    #[error("No parameter identifier found in '{0}'")]
    NoIdentifier(String),

    #[error("No basis count (KL<n>) found after identifier in '{0}'")]
    NoBasisCount(String),

    #[error("Invalid spectral template name '{0}': must be non-empty and contain no '_' or '/', and may not be 'None'")]
    InvalidTemplateName(String),
}

/// Format a float the way identifiers and filenames expect: the shortest
/// decimal that reads back to the same value, without a trailing `.0`.
pub fn format_number(value: f64) -> String {
    format!("{value}")
}

/// Highpass filtering switch or explicit Fourier cutoff.
///
/// Deserializes from either a JSON boolean or a number.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Highpass {
    Enabled(bool),
    Cutoff(f64),
}

impl Highpass {
    /// Gaussian sigma in pixels for a frame of the given edge length, or
    /// `None` when filtering is off.
    ///
    /// A Fourier cutoff `f` maps to `edge / (f * 2 * sqrt(2 ln 2))`.
    pub fn pixel_sigma(&self, frame_edge: usize) -> Option<f64> {
        let cutoff = match *self {
            Highpass::Enabled(false) => return None,
            Highpass::Enabled(true) => DEFAULT_HIGHPASS_CUTOFF,
            Highpass::Cutoff(cutoff) => cutoff,
        };
        Some(frame_edge as f64 / (cutoff * 2.0 * (2.0 * std::f64::consts::LN_2).sqrt()))
    }
}

impl fmt::Display for Highpass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Highpass::Enabled(true) => write!(f, "True"),
            Highpass::Enabled(false) => write!(f, "False"),
            Highpass::Cutoff(cutoff) => write!(f, "{}", format_number(*cutoff)),
        }
    }
}

impl FromStr for Highpass {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "True" => Ok(Highpass::Enabled(true)),
            "False" => Ok(Highpass::Enabled(false)),
            other => other
                .parse::<f64>()
                .map(Highpass::Cutoff)
                .map_err(|_| IdentifierError::InvalidValue {
                    what: "highpass",
                    value: s.to_string(),
                }),
        }
    }
}

/// Check a spectral template name can be embedded in identifiers.
pub fn validate_template_name(name: &str) -> Result<(), IdentifierError> {
    if name.is_empty() || name.contains('_') || name.contains('/') || name == NO_TEMPLATE {
        return Err(IdentifierError::InvalidTemplateName(name.to_string()));
    }
    Ok(())
}

/// One combination of reduction tuning parameters.
///
/// The basis-count list is shared by the whole sweep and is not part of the
/// parameter set; each basis count produces its own artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub annuli: u32,
    pub subsections: u32,
    pub movement: f64,
    /// Spectral template name, `None` for no template
    pub spectrum: Option<String>,
    pub corr_smooth: f64,
    pub highpass: Highpass,
}

impl ParameterSet {
    /// The canonical identifier string for this parameter set.
    pub fn identifier(&self) -> String {
        self.to_string()
    }

    /// Parse an identifier produced by [`ParameterSet::identifier`].
    pub fn from_identifier(identifier: &str) -> Result<Self, IdentifierError> {
        let body = identifier
            .strip_suffix('_')
            .ok_or_else(|| IdentifierError::MissingTerminator(identifier.to_string()))?;
        let fields: Vec<&str> = body.split('_').collect();
        if fields.len() != FIELD_SUFFIXES.len() {
            return Err(IdentifierError::WrongFieldCount {
                identifier: identifier.to_string(),
                found: fields.len(),
                expected: FIELD_SUFFIXES.len(),
            });
        }

        let mut values = [""; 6];
        for (slot, (field, suffix)) in values.iter_mut().zip(fields.iter().zip(FIELD_SUFFIXES)) {
            *slot = field
                .strip_suffix(suffix)
                .ok_or_else(|| IdentifierError::MissingSuffix {
                    field: field.to_string(),
                    suffix,
                })?;
        }

        let invalid = |what: &'static str, value: &str| IdentifierError::InvalidValue {
            what,
            value: value.to_string(),
        };
        let [annuli, subsections, movement, spectrum, corr_smooth, highpass] = values;

        Ok(Self {
            annuli: annuli.parse().map_err(|_| invalid("annuli", annuli))?,
            subsections: subsections
                .parse()
                .map_err(|_| invalid("subsections", subsections))?,
            movement: movement.parse().map_err(|_| invalid("movement", movement))?,
            spectrum: match spectrum {
                NO_TEMPLATE => None,
                name => {
                    validate_template_name(name)?;
                    Some(name.to_string())
                }
            },
            corr_smooth: corr_smooth
                .parse()
                .map_err(|_| invalid("corr_smooth", corr_smooth))?,
            highpass: highpass.parse()?,
        })
    }

    /// Template name as embedded in identifiers
    pub fn spectrum_label(&self) -> &str {
        self.spectrum.as_deref().unwrap_or(NO_TEMPLATE)
    }
}

impl fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Annuli_{}Subsections_{}Movement_{}Spectrum_{}Smooth_{}Highpass_",
            self.annuli,
            self.subsections,
            format_number(self.movement),
            self.spectrum_label(),
            format_number(self.corr_smooth),
            self.highpass,
        )
    }
}

/// Parameter set and basis count recovered from an artifact filename.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactName {
    pub params: ParameterSet,
    pub numbasis: usize,
}

impl ArtifactName {
    /// Parse any file name written by the sweep:
    ///
    /// - `{object}_withfakes_{id}-KL{n}-speccube.json`
    /// - `{id}_KL{n}_contrast.csv`
    /// - `{id}_KL{n}_SNR-{threshold}.csv`
    ///
    /// Directory components are ignored.
    pub fn parse(file_name: &str) -> Result<Self, IdentifierError> {
        let name = file_name.rsplit('/').next().unwrap_or(file_name);

        // The object name may itself contain digits or underscores, so try
        // every "Annuli_" occurrence until one yields a valid identifier.
        for (pos, _) in name.match_indices("Annuli_") {
            let start = name[..pos]
                .char_indices()
                .rev()
                .take_while(|(_, c)| c.is_ascii_digit())
                .last()
                .map(|(i, _)| i);
            let Some(start) = start else { continue };

            let candidate = &name[start..];
            let mut split_at = 0;
            let mut fields = 0;
            for (i, c) in candidate.char_indices() {
                if c == '_' {
                    fields += 1;
                    if fields == FIELD_SUFFIXES.len() {
                        split_at = i + 1;
                        break;
                    }
                }
            }
            if fields < FIELD_SUFFIXES.len() {
                continue;
            }

            let Ok(params) = ParameterSet::from_identifier(&candidate[..split_at]) else {
                continue;
            };
            let numbasis = parse_basis_count(&candidate[split_at..])
                .ok_or_else(|| IdentifierError::NoBasisCount(file_name.to_string()))?;
            return Ok(Self { params, numbasis });
        }

        Err(IdentifierError::NoIdentifier(file_name.to_string()))
    }
}

fn parse_basis_count(rest: &str) -> Option<usize> {
    let rest = rest.strip_prefix('-').unwrap_or(rest);
    let digits: String = rest
        .strip_prefix("KL")?
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
