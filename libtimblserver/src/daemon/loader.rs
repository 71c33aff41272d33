// Copyright 2023 Google LLC
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

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use tracing::{error, info, instrument};

use crate::{
    config,
    daemon::server::BaseMap,
    engine::{Algorithm, Experiment, Weighting},
};

/// Instantiate every experiment the config declares and collect the
/// successful ones into the base map. A bad entry is logged and
/// skipped; an empty map afterwards aborts startup.
#[instrument(skip_all)]
pub fn start_experiments(config: &config::Config) -> anyhow::Result<BaseMap> {
    let decls = config.experiment_decls()?;
    if decls.is_empty() {
        bail!(
            "unable to initialize at least one experiment, \
             please check your commandline or configuration file"
        );
    }

    let config_dir = config.global.config_dir.as_deref();
    let mut bases = BaseMap::new();
    for (name, opt_string) in &decls {
        match start_experiment(name, opt_string, config_dir) {
            Ok(exp) => {
                info!("started experiment {} with parameters: {}", name, opt_string);
                bases.insert(name.clone(), exp);
            }
            Err(err) => {
                error!(
                    "FAILED to start experiment {} with parameters: {}: {:?}",
                    name, opt_string, err
                );
            }
        }
    }
    if bases.is_empty() {
        bail!("unable to start a server, no valid experiments could be instantiated");
    }
    Ok(bases)
}

// The loader options extracted from one declaration. Everything not
// listed here is handed to the engine's option parser untouched.
#[derive(Default)]
struct LoaderOpts {
    algorithm: Option<Algorithm>,
    train_file: Option<String>,
    tree_file: Option<String>,
    prob_file: Option<String>,
    weights: Option<(String, Weighting)>,
    matrix_file: Option<String>,
    engine_opts: Vec<String>,
}

fn start_experiment(
    name: &str,
    opt_string: &str,
    config_dir: Option<&str>,
) -> anyhow::Result<Experiment> {
    let tokens = shell_words::split(opt_string).context("tokenizing experiment options")?;
    let opts = extract_loader_opts(&tokens)?;

    let algorithm = opts.algorithm.unwrap_or(Algorithm::Ib1);
    if opts.train_file.is_some() && opts.tree_file.is_some() {
        bail!("both '-f' and '-i' given");
    }
    if opts.prob_file.is_some() && algorithm == Algorithm::IgTree {
        bail!("-u option is useless for IGtree");
    }

    let mut exp = Experiment::new(algorithm, name);
    if let Some(train) = &opts.train_file {
        let train = resolve(train, config_dir);
        info!("trainName = {:?}", train);
        exp.learn(train)?;
    } else if let Some(tree) = &opts.tree_file {
        let tree = resolve(tree, config_dir);
        info!("treeName = {:?}", tree);
        exp.get_instance_base(tree)?;
    } else {
        bail!("missing '-i' or '-f' option");
    }

    if let Some((file, weighting)) = &opts.weights {
        exp.get_weights(resolve(file, config_dir), *weighting)?;
    }
    if let Some(prob) = &opts.prob_file {
        exp.get_arrays(resolve(prob, config_dir))?;
    }
    if let Some(matrix) = &opts.matrix_file {
        exp.get_matrices(resolve(matrix, config_dir))?;
    }
    if !opts.engine_opts.is_empty() {
        exp.set_options(&opts.engine_opts.join(" "))
            .context("applying experiment options")?;
    }
    exp.init_experiment()?;
    Ok(exp)
}

fn extract_loader_opts(tokens: &[String]) -> anyhow::Result<LoaderOpts> {
    let mut opts = LoaderOpts::default();
    let mut iter = tokens.iter().peekable();
    while let Some(token) = iter.next() {
        if let Some(rest) = token.strip_prefix("--matrixin") {
            opts.matrix_file = Some(flag_value("--matrixin", rest, &mut iter)?);
            continue;
        }
        let flag = token
            .strip_prefix('-')
            .filter(|rest| !rest.starts_with('-'))
            .and_then(|rest| rest.chars().next());
        match flag {
            Some('a') => {
                let value = flag_value("-a", &token[2..], &mut iter)?;
                opts.algorithm = Some(value.parse()?);
            }
            Some('f') => opts.train_file = Some(flag_value("-f", &token[2..], &mut iter)?),
            Some('i') => opts.tree_file = Some(flag_value("-i", &token[2..], &mut iter)?),
            Some('u') => opts.prob_file = Some(flag_value("-u", &token[2..], &mut iter)?),
            Some('w') => {
                let value = flag_value("-w", &token[2..], &mut iter)?;
                if value.parse::<Weighting>().is_ok() {
                    // a bare scheme selection, not a weights file
                    opts.engine_opts.push(format!("-w{value}"));
                } else {
                    opts.weights = Some(split_weights_value(&value)?);
                }
            }
            _ => opts.engine_opts.push(token.clone()),
        }
    }
    Ok(opts)
}

// `-w` may carry `<file>` or `<file>:<type>`; the type defaults to
// gain ratio.
fn split_weights_value(value: &str) -> anyhow::Result<(String, Weighting)> {
    match value.split_once(':') {
        Some((file, weighting)) => {
            let weighting = weighting
                .parse()
                .map_err(|_| anyhow!("invalid weighting option: {}", value))?;
            Ok((String::from(file), weighting))
        }
        None => Ok((String::from(value), Weighting::GainRatio)),
    }
}

fn flag_value<'a, I>(
    flag: &str,
    rest: &str,
    iter: &mut std::iter::Peekable<I>,
) -> anyhow::Result<String>
where
    I: Iterator<Item = &'a String>,
{
    let rest = rest.strip_prefix('=').unwrap_or(rest);
    if !rest.is_empty() {
        return Ok(String::from(rest));
    }
    match iter.peek() {
        Some(next) if !next.starts_with('-') && !next.starts_with('+') => {
            Ok(iter.next().map(String::from).unwrap_or_default())
        }
        _ => Err(anyhow!("missing value for '{}'", flag)),
    }
}

fn resolve(path: &str, config_dir: Option<&str>) -> PathBuf {
    match config_dir {
        Some(dir) if Path::new(path).is_relative() => Path::new(dir).join(path),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;
    use std::fs;

    use ntest::timeout;

    use super::*;
    use crate::config::Config;

    fn write_train(dir: &Path, name: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, "a,b,c,X\na,b,d,X\na,e,d,Y\n").expect("write train data");
        String::from(path.to_str().expect("utf8 path"))
    }

    fn config_with(experiments: BTreeMap<String, String>) -> Config {
        let mut config = Config::default();
        config.global.port = Some(0);
        config.experiments = Some(experiments);
        config
    }

    #[test]
    #[timeout(30000)]
    fn loads_declared_experiments() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let train = write_train(dir.path(), "one.data");
        let mut experiments = BTreeMap::new();
        experiments.insert(String::from("b1"), format!("-f {train}"));
        experiments.insert(String::from("b2"), format!("-a IB1 +vdb+di -f {train}"));

        let bases = start_experiments(&config_with(experiments)).expect("loader");
        assert_eq!(bases.len(), 2);
        assert_eq!(bases.get("b2").map(|e| e.algorithm_name()), Some(String::from("IB1")));
    }

    #[test]
    #[timeout(30000)]
    fn bad_entry_is_skipped() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let train = write_train(dir.path(), "one.data");
        let mut experiments = BTreeMap::new();
        experiments.insert(String::from("good"), format!("-f {train}"));
        experiments.insert(String::from("bad"), String::from("-f /no/such/file.data"));
        experiments.insert(String::from("worse"), String::from("+vdb"));

        let bases = start_experiments(&config_with(experiments)).expect("loader");
        assert_eq!(bases.len(), 1);
        assert!(bases.contains_key("good"));
    }

    #[test]
    #[timeout(30000)]
    fn no_valid_experiment_aborts() {
        let mut experiments = BTreeMap::new();
        experiments.insert(String::from("bad"), String::from("-f /no/such/file.data"));
        assert!(start_experiments(&config_with(experiments)).is_err());

        assert!(start_experiments(&config_with(BTreeMap::new())).is_err());
    }

    #[test]
    #[timeout(30000)]
    fn config_dir_resolves_relative_paths() {
        let dir = tempfile::tempdir().expect("tmp dir");
        write_train(dir.path(), "rel.data");
        let mut config = config_with(BTreeMap::from([(
            String::from("default"),
            String::from("-f rel.data"),
        )]));
        config.global.config_dir = Some(String::from(dir.path().to_str().expect("utf8 path")));

        let bases = start_experiments(&config).expect("loader");
        assert!(bases.contains_key("default"));
    }

    #[test]
    #[timeout(30000)]
    fn u_option_rejected_for_igtree() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let train = write_train(dir.path(), "one.data");
        let prob = dir.path().join("probs");
        fs::write(&prob, "X 0.5\nY 0.5\n").expect("write probs");

        let err = start_experiment(
            "exp",
            &format!("-a IGTREE -f {train} -u {}", prob.display()),
            None,
        );
        assert!(err.is_err());
    }

    #[test]
    #[timeout(30000)]
    fn bare_weighting_value_stays_an_engine_option() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let train = write_train(dir.path(), "one.data");
        let exp =
            start_experiment("exp", &format!("-f {train} -w nw"), None).expect("experiment");
        assert_eq!(exp.settings_to_json()["weighting"], "NW");
    }
}
