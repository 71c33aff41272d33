// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{fmt, str::FromStr};

use anyhow::{anyhow, bail};
use bitflags::bitflags;

bitflags! {
    /// The verbosity bits that gate the optional parts of a
    /// classification response.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Verbosity: u8 {
        const DISTRIB = 1 << 0;
        const DISTANCE = 1 << 1;
        const MATCH_DEPTH = 1 << 2;
        const CONFIDENCE = 1 << 3;
        const NEAR_N = 1 << 4;
    }
}

impl Verbosity {
    fn from_code(code: &str) -> Option<Verbosity> {
        match code.to_ascii_lowercase().as_str() {
            "db" => Some(Verbosity::DISTRIB),
            "di" => Some(Verbosity::DISTANCE),
            "md" => Some(Verbosity::MATCH_DEPTH),
            "cf" => Some(Verbosity::CONFIDENCE),
            "n" => Some(Verbosity::NEAR_N),
            _ => None,
        }
    }

    /// The option-string rendering of the currently set bits,
    /// e.g. `+db+di`.
    pub fn codes(self) -> String {
        let mut out = String::new();
        for (bit, code) in [
            (Verbosity::DISTRIB, "db"),
            (Verbosity::DISTANCE, "di"),
            (Verbosity::MATCH_DEPTH, "md"),
            (Verbosity::CONFIDENCE, "cf"),
            (Verbosity::NEAR_N, "n"),
        ] {
            if self.contains(bit) {
                out.push('+');
                out.push_str(code);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Ib1,
    IgTree,
    Tribl,
    Ib2,
    Tribl2,
}

impl FromStr for Algorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Algorithm> {
        // Numeric aliases match the classic command line usage
        // (`-a1` selects IGTREE).
        match s.to_ascii_uppercase().as_str() {
            "IB1" | "0" => Ok(Algorithm::Ib1),
            "IGTREE" | "1" => Ok(Algorithm::IgTree),
            "TRIBL" | "2" => Ok(Algorithm::Tribl),
            "IB2" | "3" => Ok(Algorithm::Ib2),
            "TRIBL2" | "4" => Ok(Algorithm::Tribl2),
            _ => Err(anyhow!("illegal -a value: {}", s)),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Algorithm::Ib1 => "IB1",
            Algorithm::IgTree => "IGTREE",
            Algorithm::Tribl => "TRIBL",
            Algorithm::Ib2 => "IB2",
            Algorithm::Tribl2 => "TRIBL2",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weighting {
    NoWeight,
    GainRatio,
    InfoGain,
    ChiSquare,
    SharedVariance,
}

impl FromStr for Weighting {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Weighting> {
        match s.to_ascii_lowercase().as_str() {
            "nw" | "0" => Ok(Weighting::NoWeight),
            "gr" | "1" => Ok(Weighting::GainRatio),
            "ig" | "2" => Ok(Weighting::InfoGain),
            "x2" | "3" => Ok(Weighting::ChiSquare),
            "sv" | "4" => Ok(Weighting::SharedVariance),
            _ => Err(anyhow!("invalid weighting option: {}", s)),
        }
    }
}

impl fmt::Display for Weighting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Weighting::NoWeight => "NW",
            Weighting::GainRatio => "GR",
            Weighting::InfoGain => "IG",
            Weighting::ChiSquare => "X2",
            Weighting::SharedVariance => "SV",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Overlap,
    ValueDiff,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::Overlap => "Overlap",
            Metric::ValueDiff => "ValueDiff",
        };
        write!(f, "{name}")
    }
}

/// The per-experiment option state a session can change with `SET`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSet {
    pub k: usize,
    pub verbosity: Verbosity,
    pub metric: Metric,
    pub weighting: Weighting,
}

impl Default for OptionSet {
    fn default() -> OptionSet {
        OptionSet {
            k: 1,
            verbosity: Verbosity::DISTRIB,
            metric: Metric::Overlap,
            weighting: Weighting::GainRatio,
        }
    }
}

/// A single parsed option change. Parsing a whole option string into
/// changes before touching the option set is what makes a rejected
/// `SET` leave the prior state intact.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    K(usize),
    Metric(Metric),
    Weighting(Weighting),
    Verbosity { bits: Verbosity, add: bool },
}

impl OptionSet {
    pub fn apply(&mut self, changes: &[Change]) {
        for change in changes {
            match change {
                Change::K(k) => self.k = *k,
                Change::Metric(m) => self.metric = *m,
                Change::Weighting(w) => self.weighting = *w,
                Change::Verbosity { bits, add: true } => self.verbosity |= *bits,
                Change::Verbosity { bits, add: false } => self.verbosity &= !*bits,
            }
        }
    }
}

/// Parse an option string like `+vdb -k 3 -mO` into a list of changes.
///
/// Tokens are whitespace separated and must carry a `+` or `-` sign.
/// Verbosity values take their sign from the token by default but an
/// inner `+`/`-` overrides it, so `-v+db` still adds the distribution
/// bit. Any unknown token fails the whole string.
pub fn parse_changes(spec: &str) -> anyhow::Result<Vec<Change>> {
    let mut changes = Vec::new();
    let mut tokens = spec.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        let mut chars = token.chars();
        let sign = chars.next().ok_or_else(|| anyhow!("empty option token"))?;
        if sign != '+' && sign != '-' {
            bail!("unknown option: '{}'", token);
        }
        let flag = chars
            .next()
            .ok_or_else(|| anyhow!("dangling '{}' in option string", sign))?;
        let mut value: String = chars.collect();
        if value.is_empty() && matches!(flag, 'k' | 'm' | 'w') {
            // the value may be a separate token, as in `-k 3`
            if let Some(next) = tokens.peek().copied() {
                if !next.starts_with('+') && !next.starts_with('-') {
                    tokens.next();
                    value = String::from(next);
                }
            }
        }
        match flag {
            'v' => parse_verbosity(&value, sign == '+', &mut changes)?,
            'k' => {
                let k: usize = value
                    .parse()
                    .map_err(|_| anyhow!("invalid -k value: '{}'", value))?;
                changes.push(Change::K(k));
            }
            'm' => {
                let metric = match value.to_ascii_uppercase().as_str() {
                    "O" => Metric::Overlap,
                    "M" => Metric::ValueDiff,
                    // `+md` is the bare match-depth verbosity toggle
                    _ => match Verbosity::from_code(&format!("{flag}{value}")) {
                        Some(bits) => {
                            changes.push(Change::Verbosity { bits, add: sign == '+' });
                            continue;
                        }
                        None => bail!("invalid -m value: '{}'", value),
                    },
                };
                changes.push(Change::Metric(metric));
            }
            'w' => changes.push(Change::Weighting(value.parse()?)),
            // verbosity codes also work without the `v`, as in `+db`
            _ => match Verbosity::from_code(&format!("{flag}{value}")) {
                Some(bits) => changes.push(Change::Verbosity { bits, add: sign == '+' }),
                None => bail!("unknown option: '{}'", token),
            },
        }
    }
    Ok(changes)
}

fn parse_verbosity(value: &str, default_add: bool, changes: &mut Vec<Change>) -> anyhow::Result<()> {
    if value.is_empty() {
        bail!("missing verbosity value");
    }
    let mut add = default_add;
    let mut code = String::new();
    let push = |code: &str, add: bool, changes: &mut Vec<Change>| -> anyhow::Result<()> {
        let bits = Verbosity::from_code(code)
            .ok_or_else(|| anyhow!("unknown verbosity code: '{}'", code))?;
        changes.push(Change::Verbosity { bits, add });
        Ok(())
    };
    for c in value.chars() {
        if c == '+' || c == '-' {
            if !code.is_empty() {
                push(&code, add, changes)?;
                code.clear();
            }
            add = c == '+';
        } else {
            code.push(c);
        }
    }
    if code.is_empty() {
        bail!("trailing sign in verbosity value: '{}'", value);
    }
    push(&code, add, changes)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn verbosity_inner_sign_wins() {
        // the http handler prepends '-' to bare values, so `-v+db`
        // must still add the distribution bit
        let changes = parse_changes("-v+db").expect("parse");
        assert_eq!(
            changes,
            vec![Change::Verbosity { bits: Verbosity::DISTRIB, add: true }]
        );
    }

    #[test]
    fn verbosity_combined_codes() {
        let changes = parse_changes("+vdb+di-md").expect("parse");
        assert_eq!(
            changes,
            vec![
                Change::Verbosity { bits: Verbosity::DISTRIB, add: true },
                Change::Verbosity { bits: Verbosity::DISTANCE, add: true },
                Change::Verbosity { bits: Verbosity::MATCH_DEPTH, add: false },
            ]
        );
    }

    #[test]
    fn bare_verbosity_codes() {
        let changes = parse_changes("+db -di +md +n").expect("parse");
        assert_eq!(
            changes,
            vec![
                Change::Verbosity { bits: Verbosity::DISTRIB, add: true },
                Change::Verbosity { bits: Verbosity::DISTANCE, add: false },
                Change::Verbosity { bits: Verbosity::MATCH_DEPTH, add: true },
                Change::Verbosity { bits: Verbosity::NEAR_N, add: true },
            ]
        );
    }

    #[test]
    fn detached_values() {
        let changes = parse_changes("-k 3 -mO +w ig").expect("parse");
        assert_eq!(
            changes,
            vec![
                Change::K(3),
                Change::Metric(Metric::Overlap),
                Change::Weighting(Weighting::InfoGain),
            ]
        );
    }

    #[test]
    fn unknown_tokens_reject() {
        assert!(parse_changes("+vdb -q7").is_err());
        assert!(parse_changes("bogus").is_err());
        assert!(parse_changes("+vzz").is_err());
        assert!(parse_changes("-k abc").is_err());
    }

    #[test]
    fn apply_changes() {
        let mut opts = OptionSet::default();
        opts.apply(&parse_changes("+vdi -k2 -wnw").expect("parse"));
        assert_eq!(opts.k, 2);
        assert_eq!(opts.weighting, Weighting::NoWeight);
        assert!(opts.verbosity.contains(Verbosity::DISTRIB | Verbosity::DISTANCE));

        opts.apply(&parse_changes("-vdb").expect("parse"));
        assert!(!opts.verbosity.contains(Verbosity::DISTRIB));
        assert!(opts.verbosity.contains(Verbosity::DISTANCE));
    }

    #[test]
    fn algorithm_and_weighting_aliases() {
        assert_eq!("IB1".parse::<Algorithm>().expect("parse"), Algorithm::Ib1);
        assert_eq!("1".parse::<Algorithm>().expect("parse"), Algorithm::IgTree);
        assert_eq!("gr".parse::<Weighting>().expect("parse"), Weighting::GainRatio);
        assert_eq!("0".parse::<Weighting>().expect("parse"), Weighting::NoWeight);
        assert!("bogus".parse::<Algorithm>().is_err());
    }
}
