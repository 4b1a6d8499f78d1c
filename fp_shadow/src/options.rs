// Copyright 2026 the FpShadow Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tool options.
//!
//! Options arrive from the host as raw `--flag=value` strings. Parsing is
//! strict: an unknown flag, a malformed boolean, or an out-of-range precision
//! fails the whole parse.

use core::fmt;

use rug::float;

/// Engine configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolOptions {
    /// Working precision of the high-precision shadow channel, in bits.
    pub precision: u32,
    /// Maintain per-origin mean/max error accumulators.
    pub mean_error: bool,
    /// Skip instrumentation of library code and filter it from reports.
    pub ignore_libraries: bool,
    /// Omit accurate (error-free) entries from reports.
    pub ignore_accurate: bool,
    /// Run the shadow channel at guest precision instead of high precision.
    pub simulate_original: bool,
    /// Initial state of the runtime analysis switch.
    pub analyze_all: bool,
    /// Track cancellation badness via the exact-bits heuristic. Not exposed
    /// as a flag; reports label the derived columns.
    pub bad_cancellations: bool,
    /// Ignore `END` client requests so analysis stays on.
    pub ignore_end: bool,
    /// Log the location of every large error as it appears.
    pub error_localization: bool,
    /// Log the error of every evaluated statement.
    pub print_every_error: bool,
    /// Detect precision-specific operations and fix them at runtime.
    pub detect_pso: bool,
    /// Let the high-precision shadow decide CmpF64 branches.
    pub goto_shadow_branch: bool,
    /// Propagate shadow values through float-to-integer conversions.
    pub track_int: bool,
}

impl Default for ToolOptions {
    fn default() -> Self {
        Self {
            precision: 120,
            mean_error: true,
            ignore_libraries: false,
            ignore_accurate: true,
            simulate_original: false,
            analyze_all: true,
            bad_cancellations: true,
            ignore_end: false,
            error_localization: false,
            print_every_error: false,
            detect_pso: false,
            goto_shadow_branch: false,
            track_int: false,
        }
    }
}

/// An option-parsing failure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OptionError {
    /// The flag is not recognized.
    UnknownFlag(String),
    /// A boolean flag had a value other than `yes` or `no`.
    BadBool {
        /// The flag name.
        flag: &'static str,
        /// The offending value.
        value: String,
    },
    /// The precision was not a number or was outside the library's range.
    BadPrecision(String),
}

impl fmt::Display for OptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownFlag(flag) => write!(f, "unknown flag {flag}"),
            Self::BadBool { flag, value } => {
                write!(f, "{flag} expects yes or no, got {value}")
            }
            Self::BadPrecision(value) => write!(
                f,
                "--precision expects {}..={} bits, got {value}",
                float::prec_min(),
                float::prec_max()
            ),
        }
    }
}

impl std::error::Error for OptionError {}

fn parse_bool(flag: &'static str, value: &str) -> Result<bool, OptionError> {
    match value {
        "yes" => Ok(true),
        "no" => Ok(false),
        _ => Err(OptionError::BadBool {
            flag,
            value: value.into(),
        }),
    }
}

impl ToolOptions {
    /// Parses options from `--flag=value` argument strings.
    pub fn parse<'a, I>(args: I) -> Result<Self, OptionError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut opts = Self::default();
        for arg in args {
            opts.apply(arg)?;
        }
        Ok(opts)
    }

    /// Applies a single `--flag=value` argument.
    pub fn apply(&mut self, arg: &str) -> Result<(), OptionError> {
        let (flag, value) = arg
            .split_once('=')
            .ok_or_else(|| OptionError::UnknownFlag(arg.into()))?;
        match flag {
            "--precision" => {
                let bits: u32 = value
                    .parse()
                    .map_err(|_| OptionError::BadPrecision(value.into()))?;
                if bits < float::prec_min() || bits > float::prec_max() {
                    return Err(OptionError::BadPrecision(value.into()));
                }
                self.precision = bits;
            }
            "--mean-error" => self.mean_error = parse_bool("--mean-error", value)?,
            "--ignore-libraries" => {
                self.ignore_libraries = parse_bool("--ignore-libraries", value)?;
            }
            "--ignore-accurate" => {
                self.ignore_accurate = parse_bool("--ignore-accurate", value)?;
            }
            "--sim-original" => self.simulate_original = parse_bool("--sim-original", value)?,
            "--analyze-all" => self.analyze_all = parse_bool("--analyze-all", value)?,
            "--ignore-end" => self.ignore_end = parse_bool("--ignore-end", value)?,
            "--error-localization" => {
                self.error_localization = parse_bool("--error-localization", value)?;
            }
            "--print-every-error" => {
                self.print_every_error = parse_bool("--print-every-error", value)?;
            }
            "--detect-pso" => self.detect_pso = parse_bool("--detect-pso", value)?,
            "--goto-shadow-branch" => {
                self.goto_shadow_branch = parse_bool("--goto-shadow-branch", value)?;
            }
            "--track-int" => self.track_int = parse_bool("--track-int", value)?,
            _ => return Err(OptionError::UnknownFlag(arg.into())),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_usage_text() {
        let opts = ToolOptions::default();
        assert_eq!(opts.precision, 120);
        assert!(opts.mean_error);
        assert!(opts.ignore_accurate);
        assert!(opts.analyze_all);
        assert!(!opts.detect_pso);
        assert!(!opts.track_int);
    }

    #[test]
    fn parses_known_flags() {
        let opts = ToolOptions::parse([
            "--precision=200",
            "--mean-error=no",
            "--detect-pso=yes",
            "--goto-shadow-branch=yes",
        ])
        .unwrap();
        assert_eq!(opts.precision, 200);
        assert!(!opts.mean_error);
        assert!(opts.detect_pso);
        assert!(opts.goto_shadow_branch);
    }

    #[test]
    fn unknown_flag_fails() {
        assert_eq!(
            ToolOptions::parse(["--frobnicate=yes"]),
            Err(OptionError::UnknownFlag("--frobnicate=yes".into()))
        );
    }

    #[test]
    fn malformed_bool_fails() {
        assert!(matches!(
            ToolOptions::parse(["--mean-error=maybe"]),
            Err(OptionError::BadBool { .. })
        ));
    }

    #[test]
    fn precision_bounds_enforced() {
        assert!(matches!(
            ToolOptions::parse(["--precision=0"]),
            Err(OptionError::BadPrecision(_))
        ));
        assert!(matches!(
            ToolOptions::parse(["--precision=elephants"]),
            Err(OptionError::BadPrecision(_))
        ));
    }
}
