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

//! The memory-based classification engine the server fronts.
//!
//! An [`Experiment`] is a fully trained instance base plus the option
//! state a session may change. The shared copy held in the base map is
//! never classified against directly; every session works on a deep
//! clone because classification leaves per-query scratch state
//! (neighbors, match depth, confidence) on the experiment.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    fs,
    io::{self, Write},
    path::Path,
};

use anyhow::{anyhow, bail, Context};
use quick_xml::{
    events::{BytesEnd, BytesStart, BytesText, Event},
    Writer,
};
use serde_json::{json, Value};
use tracing::debug;

mod options;

pub use options::{Algorithm, Metric, OptionSet, Verbosity, Weighting};

const TREE_HEADER: &str = "# timbl instance base v1";

/// The result of one classification.
///
/// `distribution` is the engine's own textual rendering of the
/// category weights, braces included.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: String,
    pub distribution: String,
    pub distance: f64,
}

#[derive(Debug, Clone)]
struct Instance {
    features: Vec<String>,
    category: String,
}

#[derive(Debug, Clone)]
struct Neighbor {
    rank: usize,
    distance: f64,
    instance: String,
    category: String,
}

// Per-query scratch, only valid until the next classify call.
#[derive(Debug, Clone, Default)]
struct Scratch {
    match_depth: f64,
    confidence: f64,
    neighbors: Vec<Neighbor>,
}

/// A trained memory-based classifier.
#[derive(Debug, Clone)]
pub struct Experiment {
    name: String,
    algorithm: Algorithm,
    options: OptionSet,
    num_features: usize,
    comma_sep: bool,
    instances: Vec<Instance>,
    weights: Vec<f64>,
    weights_loaded: bool,
    priors: BTreeMap<String, f64>,
    matrices: Option<HashMap<(usize, String, String), f64>>,
    scratch: Option<Scratch>,
}

impl Experiment {
    pub fn new(algorithm: Algorithm, name: &str) -> Experiment {
        Experiment {
            name: String::from(name),
            algorithm,
            options: OptionSet::default(),
            num_features: 0,
            comma_sep: true,
            instances: Vec::new(),
            weights: Vec::new(),
            weights_loaded: false,
            priors: BTreeMap::new(),
            matrices: None,
            scratch: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn algorithm_name(&self) -> String {
        self.algorithm.to_string()
    }

    /// Deep copy for one concurrent user. The clone owns its option
    /// state and scratch; mutations never reach the source.
    pub fn clone_for_session(&self, session_id: usize) -> Experiment {
        let mut exp = self.clone();
        exp.name = format!("exp-{session_id}");
        exp.scratch = None;
        exp
    }

    /// Train from a data file: one instance per line, the last field
    /// is the category. Lines starting with `#` and blank lines are
    /// skipped.
    pub fn learn<P: AsRef<Path>>(&mut self, path: P) -> anyhow::Result<()> {
        let data = fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading train file {:?}", path.as_ref()))?;
        self.load_instances(&data)
    }

    /// Load a previously saved instance base.
    pub fn get_instance_base<P: AsRef<Path>>(&mut self, path: P) -> anyhow::Result<()> {
        let data = fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading instance base {:?}", path.as_ref()))?;
        let rest = data
            .strip_prefix(TREE_HEADER)
            .ok_or_else(|| anyhow!("{:?} is not an instance base file", path.as_ref()))?;
        let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
        self.load_instances(rest)
    }

    /// Save the instance base in the format `get_instance_base` reads.
    pub fn save_instance_base<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let mut out = format!(
            "{} algorithm={} features={}\n",
            TREE_HEADER, self.algorithm, self.num_features
        );
        let sep = if self.comma_sep { "," } else { " " };
        for inst in &self.instances {
            out.push_str(&inst.features.join(sep));
            out.push_str(sep);
            out.push_str(&inst.category);
            out.push('\n');
        }
        fs::write(path.as_ref(), out)
            .with_context(|| format!("writing instance base {:?}", path.as_ref()))
    }

    fn load_instances(&mut self, data: &str) -> anyhow::Result<()> {
        for line in data.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = split_instance(line);
            if fields.len() < 2 {
                bail!("instance line '{}' has no features", line);
            }
            if self.instances.is_empty() {
                self.num_features = fields.len() - 1;
                self.comma_sep = line.contains(',');
            } else if fields.len() != self.num_features + 1 {
                bail!(
                    "instance line '{}' has {} fields, expected {}",
                    line,
                    fields.len(),
                    self.num_features + 1
                );
            }
            let category = fields.pop().ok_or_else(|| anyhow!("empty instance"))?;
            self.instances.push(Instance { features: fields, category });
        }
        if self.instances.is_empty() {
            bail!("no instances found");
        }
        Ok(())
    }

    /// Load per-feature weights from a file of `<index> <weight>`
    /// lines (1-based indices) and switch to the given scheme.
    pub fn get_weights<P: AsRef<Path>>(
        &mut self,
        path: P,
        weighting: Weighting,
    ) -> anyhow::Result<()> {
        let data = fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading weights file {:?}", path.as_ref()))?;
        let mut weights = vec![1.0; self.num_features];
        for line in data.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (idx, weight) = line
                .split_once(char::is_whitespace)
                .ok_or_else(|| anyhow!("malformed weights line '{}'", line))?;
            let idx: usize = idx.parse().context("parsing feature index")?;
            if idx == 0 || idx > self.num_features {
                bail!("weights file references feature {} of {}", idx, self.num_features);
            }
            weights[idx - 1] = weight.trim().parse().context("parsing feature weight")?;
        }
        self.weights = weights;
        self.weights_loaded = true;
        self.options.weighting = weighting;
        Ok(())
    }

    /// Load class probability arrays: `<category> <prob>` lines.
    pub fn get_arrays<P: AsRef<Path>>(&mut self, path: P) -> anyhow::Result<()> {
        let data = fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading probability file {:?}", path.as_ref()))?;
        for line in data.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (cat, prob) = line
                .split_once(char::is_whitespace)
                .ok_or_else(|| anyhow!("malformed probability line '{}'", line))?;
            self.priors
                .insert(String::from(cat), prob.trim().parse().context("parsing probability")?);
        }
        Ok(())
    }

    /// Load value-difference matrices: `<feature> <v1> <v2> <delta>`
    /// lines (1-based feature indices). Loading them makes the
    /// ValueDiff metric available.
    pub fn get_matrices<P: AsRef<Path>>(&mut self, path: P) -> anyhow::Result<()> {
        let data = fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading matrix file {:?}", path.as_ref()))?;
        let mut matrices = HashMap::new();
        for line in data.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() != 4 {
                bail!("malformed matrix line '{}'", line);
            }
            let fi: usize = parts[0].parse().context("parsing matrix feature index")?;
            if fi == 0 || fi > self.num_features {
                bail!("matrix file references feature {} of {}", fi, self.num_features);
            }
            let delta: f64 = parts[3].parse().context("parsing matrix delta")?;
            let (a, b) = ordered(parts[1], parts[2]);
            matrices.insert((fi - 1, String::from(a), String::from(b)), delta);
        }
        self.matrices = Some(matrices);
        Ok(())
    }

    /// Finalize the experiment: compute feature weights for the
    /// current weighting scheme unless a weights file already set
    /// them. Must be called once before the first classify.
    pub fn init_experiment(&mut self) -> anyhow::Result<()> {
        if self.instances.is_empty() {
            bail!("experiment '{}' has no instances", self.name);
        }
        if !self.weights_loaded {
            self.weights = self.compute_weights(self.options.weighting);
        }
        Ok(())
    }

    /// Two-phase option update: the whole string is parsed first and
    /// the result validated against this experiment; any rejection
    /// leaves the prior option state untouched.
    pub fn set_options(&mut self, spec: &str) -> anyhow::Result<()> {
        let changes = options::parse_changes(spec)?;
        let mut pending = self.options.clone();
        pending.apply(&changes);
        self.confirm(&pending)?;
        let reweigh = pending.weighting != self.options.weighting && !self.weights_loaded;
        self.options = pending;
        if reweigh {
            self.weights = self.compute_weights(self.options.weighting);
        }
        Ok(())
    }

    fn confirm(&self, pending: &OptionSet) -> anyhow::Result<()> {
        if pending.k == 0 {
            bail!("-k must be at least 1");
        }
        if pending.metric == Metric::ValueDiff && self.matrices.is_none() {
            bail!("ValueDiff metric needs value difference matrices");
        }
        Ok(())
    }

    pub fn verbosity(&self, flag: Verbosity) -> bool {
        self.options.verbosity.contains(flag)
    }

    pub fn match_depth(&self) -> f64 {
        self.scratch.as_ref().map(|s| s.match_depth).unwrap_or(0.0)
    }

    pub fn confidence(&self) -> f64 {
        self.scratch.as_ref().map(|s| s.confidence).unwrap_or(0.0)
    }

    pub fn has_neighbors(&self) -> bool {
        self.scratch.as_ref().map(|s| !s.neighbors.is_empty()).unwrap_or(false)
    }

    /// Classify one instance string. The input must carry exactly the
    /// trained number of features; one extra trailing field is
    /// tolerated and ignored as a gold category.
    pub fn classify(&mut self, input: &str) -> anyhow::Result<Classification> {
        self.scratch = None;
        if self.instances.is_empty() {
            bail!("experiment '{}' is not trained", self.name);
        }
        let fields = split_instance(input.trim());
        let features: &[String] = if fields.len() == self.num_features {
            &fields
        } else if fields.len() == self.num_features + 1 {
            &fields[..self.num_features]
        } else {
            bail!(
                "input '{}' has {} features, expected {}",
                input,
                fields.len(),
                self.num_features
            );
        };

        let mut ranked: Vec<(f64, usize)> = self
            .instances
            .iter()
            .enumerate()
            .map(|(i, inst)| (self.instance_distance(features, inst), i))
            .collect();
        ranked.sort_by(|a, b| {
            a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal).then(a.1.cmp(&b.1))
        });

        // keep the k nearest distinct distances, whole bands at a time
        let mut bands: Vec<(f64, Vec<usize>)> = Vec::new();
        for (dist, idx) in ranked {
            let matches_last = matches!(bands.last(), Some((band_dist, _)) if (dist - *band_dist).abs() < 1e-9);
            if matches_last {
                bands.last_mut().unwrap().1.push(idx);
            } else if bands.len() < self.options.k {
                bands.push((dist, vec![idx]));
            } else {
                break;
            }
        }

        let mut distribution: BTreeMap<&str, f64> = BTreeMap::new();
        for (_, members) in &bands {
            for idx in members {
                *distribution.entry(self.instances[*idx].category.as_str()).or_insert(0.0) += 1.0;
            }
        }
        let total: f64 = distribution.values().sum();
        // BTreeMap iteration is name-ordered, so ties break toward the
        // lexicographically smallest category
        let (category, winner_weight) = distribution
            .iter()
            .fold((None, 0.0), |(cat, max), (name, weight)| {
                if cat.is_none() || *weight > max {
                    (Some(*name), *weight)
                } else {
                    (cat, max)
                }
            });
        let category = String::from(category.ok_or_else(|| anyhow!("empty distribution"))?);

        let nearest = &self.instances[bands[0].1[0]];
        let match_depth = (0..self.num_features)
            .filter(|fi| self.feature_distance(*fi, &features[*fi], &nearest.features[*fi]) == 0.0)
            .count() as f64;

        let sep = if self.comma_sep { "," } else { " " };
        let mut neighbors = Vec::new();
        for (rank, (dist, members)) in bands.iter().enumerate() {
            for idx in members {
                let inst = &self.instances[*idx];
                neighbors.push(Neighbor {
                    rank: rank + 1,
                    distance: *dist,
                    instance: inst.features.join(sep),
                    category: inst.category.clone(),
                });
            }
        }

        let result = Classification {
            category: category.clone(),
            distribution: render_distribution(&distribution),
            distance: bands[0].0,
        };
        self.scratch = Some(Scratch {
            match_depth,
            confidence: if total > 0.0 { winner_weight / total } else { 0.0 },
            neighbors,
        });
        debug!(
            "{}: {} --> {} {} {}",
            self.name, input, result.category, result.distribution, result.distance
        );
        Ok(result)
    }

    /// Classify a batch the way the JSON protocol wants it: one object
    /// for a single input, an array in input order otherwise. Failures
    /// become per-item error objects.
    pub fn classify_batch_to_json(&mut self, inputs: &[String]) -> Value {
        let mut results = Vec::with_capacity(inputs.len());
        for input in inputs {
            results.push(match self.classify(input) {
                Ok(classification) => self.classification_to_json(&classification),
                Err(err) => {
                    debug!("{}: classify failed on '{}': {:?}", self.name, input, err);
                    json!({ "error": format!("timbl:classify({input}) failed") })
                }
            });
        }
        if results.len() == 1 {
            results.remove(0)
        } else {
            Value::Array(results)
        }
    }

    fn classification_to_json(&self, classification: &Classification) -> Value {
        let mut out = serde_json::Map::new();
        out.insert(String::from("category"), json!(classification.category));
        if self.verbosity(Verbosity::DISTRIB) {
            out.insert(String::from("distribution"), json!(classification.distribution));
        }
        if self.verbosity(Verbosity::DISTANCE) {
            out.insert(String::from("distance"), json!(classification.distance));
        }
        if self.verbosity(Verbosity::MATCH_DEPTH) {
            out.insert(String::from("match_depth"), json!(self.match_depth()));
        }
        if self.verbosity(Verbosity::CONFIDENCE) {
            out.insert(String::from("confidence"), json!(self.confidence()));
        }
        if self.verbosity(Verbosity::NEAR_N) {
            let neighbors = self.neighbors_to_json();
            if neighbors.as_array().map(|a| !a.is_empty()).unwrap_or(false) {
                out.insert(String::from("neighbors"), neighbors);
            }
        }
        Value::Object(out)
    }

    pub fn neighbors_to_json(&self) -> Value {
        let neighbors = self.scratch.as_ref().map(|s| s.neighbors.as_slice()).unwrap_or(&[]);
        Value::Array(
            neighbors
                .iter()
                .map(|n| {
                    json!({
                        "rank": n.rank,
                        "distance": n.distance,
                        "instance": n.instance,
                        "category": n.category,
                    })
                })
                .collect(),
        )
    }

    pub fn settings_to_json(&self) -> Value {
        json!({
            "algorithm": self.algorithm.to_string(),
            "metric": self.options.metric.to_string(),
            "weighting": self.options.weighting.to_string(),
            "k": self.options.k,
            "verbosity": self.options.verbosity.codes(),
        })
    }

    pub fn weights_to_json(&self) -> Value {
        Value::Array(
            self.weights
                .iter()
                .enumerate()
                .map(|(i, w)| json!({ "feature": i + 1, "weight": w }))
                .collect(),
        )
    }

    /// The textual settings dump the `QUERY` command wraps in
    /// `STATUS`/`ENDSTATUS`.
    pub fn show_settings<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "Algorithm    : {}", self.algorithm)?;
        writeln!(w, "Metric       : {}", self.options.metric)?;
        writeln!(w, "Weighting    : {}", self.options.weighting)?;
        writeln!(w, "k            : {}", self.options.k)?;
        writeln!(w, "Verbosity    : {}", self.options.verbosity.codes())?;
        writeln!(w, "Features     : {}", self.num_features)?;
        writeln!(w, "Instances    : {}", self.instances.len())?;
        if !self.priors.is_empty() {
            writeln!(w, "Arrays       : {} categories", self.priors.len())?;
        }
        if self.matrices.is_some() {
            writeln!(w, "Matrices     : loaded")?;
        }
        Ok(())
    }

    /// The neighbors block of a text-protocol classify reply, one
    /// band header per distance followed by its members.
    pub fn show_best_neighbors<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let neighbors = self.scratch.as_ref().map(|s| s.neighbors.as_slice()).unwrap_or(&[]);
        let mut current_rank = 0;
        for n in neighbors {
            if n.rank != current_rank {
                writeln!(w, "# k={}, distance {}", n.rank, fmt_float(n.distance))?;
                current_rank = n.rank;
            }
            writeln!(w, "\t{} -> {}", n.instance, n.category)?;
        }
        Ok(())
    }

    pub fn write_settings_xml<W: io::Write>(&self, w: &mut Writer<W>) -> anyhow::Result<()> {
        let algorithm = self.algorithm.to_string();
        let mut start = BytesStart::new("settings");
        start.push_attribute(("algorithm", algorithm.as_str()));
        w.write_event(Event::Start(start))?;
        write_text_element(w, "metric", &self.options.metric.to_string())?;
        write_text_element(w, "weighting", &self.options.weighting.to_string())?;
        write_text_element(w, "k", &self.options.k.to_string())?;
        write_text_element(w, "verbosity", &self.options.verbosity.codes())?;
        w.write_event(Event::End(BytesEnd::new("settings")))?;
        Ok(())
    }

    pub fn write_weights_xml<W: io::Write>(&self, w: &mut Writer<W>) -> anyhow::Result<()> {
        w.write_event(Event::Start(BytesStart::new("weights")))?;
        for (i, weight) in self.weights.iter().enumerate() {
            let index = (i + 1).to_string();
            let mut start = BytesStart::new("feature");
            start.push_attribute(("index", index.as_str()));
            w.write_event(Event::Start(start))?;
            w.write_event(Event::Text(BytesText::new(&fmt_float(*weight))))?;
            w.write_event(Event::End(BytesEnd::new("feature")))?;
        }
        w.write_event(Event::End(BytesEnd::new("weights")))?;
        Ok(())
    }

    pub fn write_neighbors_xml<W: io::Write>(&self, w: &mut Writer<W>) -> anyhow::Result<()> {
        let neighbors = self.scratch.as_ref().map(|s| s.neighbors.as_slice()).unwrap_or(&[]);
        w.write_event(Event::Start(BytesStart::new("neighbors")))?;
        for n in neighbors {
            let rank = n.rank.to_string();
            let distance = fmt_float(n.distance);
            let mut start = BytesStart::new("neighbor");
            start.push_attribute(("rank", rank.as_str()));
            start.push_attribute(("distance", distance.as_str()));
            w.write_event(Event::Start(start))?;
            write_text_element(w, "instance", &n.instance)?;
            write_text_element(w, "category", &n.category)?;
            w.write_event(Event::End(BytesEnd::new("neighbor")))?;
        }
        w.write_event(Event::End(BytesEnd::new("neighbors")))?;
        Ok(())
    }

    fn instance_distance(&self, features: &[String], inst: &Instance) -> f64 {
        (0..self.num_features)
            .map(|fi| {
                self.weights.get(fi).copied().unwrap_or(1.0)
                    * self.feature_distance(fi, &features[fi], &inst.features[fi])
            })
            .sum()
    }

    fn feature_distance(&self, fi: usize, a: &str, b: &str) -> f64 {
        if a == b {
            return 0.0;
        }
        match self.options.metric {
            Metric::Overlap => 1.0,
            Metric::ValueDiff => {
                let (a, b) = ordered(a, b);
                self.matrices
                    .as_ref()
                    .and_then(|m| m.get(&(fi, String::from(a), String::from(b))))
                    .copied()
                    .unwrap_or(1.0)
            }
        }
    }

    fn compute_weights(&self, scheme: Weighting) -> Vec<f64> {
        let n = self.instances.len() as f64;
        let mut class_counts: BTreeMap<&str, f64> = BTreeMap::new();
        for inst in &self.instances {
            *class_counts.entry(inst.category.as_str()).or_insert(0.0) += 1.0;
        }
        let class_entropy = entropy(class_counts.values().copied(), n);

        (0..self.num_features)
            .map(|fi| {
                if scheme == Weighting::NoWeight {
                    return 1.0;
                }
                // contingency table: value -> category -> count
                let mut table: BTreeMap<&str, BTreeMap<&str, f64>> = BTreeMap::new();
                for inst in &self.instances {
                    *table
                        .entry(inst.features[fi].as_str())
                        .or_default()
                        .entry(inst.category.as_str())
                        .or_insert(0.0) += 1.0;
                }

                let mut info_gain = class_entropy;
                let mut split_info = 0.0;
                for counts in table.values() {
                    let value_total: f64 = counts.values().sum();
                    info_gain -= value_total / n * entropy(counts.values().copied(), value_total);
                    let p = value_total / n;
                    split_info -= p * p.log2();
                }

                match scheme {
                    Weighting::NoWeight => 1.0,
                    Weighting::InfoGain => info_gain,
                    Weighting::GainRatio => {
                        if split_info > 0.0 {
                            info_gain / split_info
                        } else {
                            0.0
                        }
                    }
                    Weighting::ChiSquare | Weighting::SharedVariance => {
                        let mut chi2 = 0.0;
                        for counts in table.values() {
                            let value_total: f64 = counts.values().sum();
                            for (cat, class_total) in &class_counts {
                                let observed = counts.get(cat).copied().unwrap_or(0.0);
                                let expected = value_total * class_total / n;
                                if expected > 0.0 {
                                    chi2 += (observed - expected).powi(2) / expected;
                                }
                            }
                        }
                        if scheme == Weighting::ChiSquare {
                            chi2
                        } else {
                            let dof = table.len().min(class_counts.len()).saturating_sub(1);
                            if dof == 0 {
                                0.0
                            } else {
                                chi2 / (n * dof as f64)
                            }
                        }
                    }
                }
            })
            .collect()
    }
}

fn split_instance(line: &str) -> Vec<String> {
    if line.contains(',') {
        line.split(',').map(|f| String::from(f.trim())).collect()
    } else {
        line.split_whitespace().map(String::from).collect()
    }
}

fn ordered<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn entropy(counts: impl Iterator<Item = f64>, total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    counts
        .filter(|c| *c > 0.0)
        .map(|c| {
            let p = c / total;
            -p * p.log2()
        })
        .sum()
}

fn render_distribution(distribution: &BTreeMap<&str, f64>) -> String {
    // heaviest first, names breaking ties
    let mut entries: Vec<(&str, f64)> = distribution.iter().map(|(k, v)| (*k, *v)).collect();
    entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then(a.0.cmp(b.0)));
    let body: Vec<String> =
        entries.iter().map(|(cat, w)| format!("{} {}", cat, fmt_float(*w))).collect();
    format!("{{ {} }}", body.join(", "))
}

/// Wire rendering for distances and weights: integral values keep one
/// decimal, everything else is rounded to six decimals.
pub fn fmt_float(value: f64) -> String {
    let rounded = (value * 1e6).round() / 1e6;
    if rounded == rounded.trunc() {
        format!("{rounded:.1}")
    } else {
        format!("{rounded}")
    }
}

fn write_text_element<W: io::Write>(
    w: &mut Writer<W>,
    tag: &str,
    text: &str,
) -> anyhow::Result<()> {
    w.write_event(Event::Start(BytesStart::new(tag)))?;
    w.write_event(Event::Text(BytesText::new(text)))?;
    w.write_event(Event::End(BytesEnd::new(tag)))?;
    Ok(())
}
