use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use owo_colors::OwoColorize;
use statefuzz::prelude::*;
use statefuzz_learning::prelude::*;

use tracing::{debug, error, info, trace};
use tracing_subscriber::{filter, prelude::*};

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};

fn sul_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("script")
                .long("script")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("file describing the inputs and outputs of the protocol"),
        )
        .arg(
            Arg::new("address")
                .long("address")
                .default_value("127.0.0.1:5683")
                .help("address of the SUL, or the address to listen on with --server"),
        )
        .arg(
            Arg::new("server")
                .long("server")
                .action(ArgAction::SetTrue)
                .help("wait for requests of a SUL acting as client"),
        )
        .arg(
            Arg::new("responder")
                .long("responder")
                .action(ArgAction::SetTrue)
                .help("take the responder role in the key exchange"),
        )
        .arg(
            Arg::new("response-wait")
                .long("response-wait")
                .value_parser(value_parser!(u64))
                .default_value("100")
                .help("milliseconds to wait for a response"),
        )
        .arg(
            Arg::new("input-timeouts")
                .long("input-timeouts")
                .help("input specific response waits, as input1:ms1,input2:ms2"),
        )
        .arg(Arg::new("command").long("command").help("command launching the SUL"))
        .arg(
            Arg::new("socket-closed-as-timeout")
                .long("socket-closed-as-timeout")
                .action(ArgAction::SetTrue)
                .help("answer TIMEOUT instead of SOCKET_CLOSED once the SUL went away"),
        )
        .arg(
            Arg::new("reset-port")
                .long("reset-port")
                .value_parser(value_parser!(u16))
                .help("port of a launcher restarting the SUL on request"),
        )
        .arg(
            Arg::new("time-limit")
                .long("time-limit")
                .value_parser(value_parser!(u64))
                .help("seconds after which the experiment stops"),
        )
        .arg(
            Arg::new("test-limit")
                .long("test-limit")
                .value_parser(value_parser!(i64))
                .help("number of tests after which the experiment stops"),
        )
}

fn cli() -> clap::Command {
    Command::new("sfz")
        .about("Stateful fuzzing of EDHOC implementations")
        .subcommand_required(true)
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbosity")
                .global(true)
                .num_args(0..=1)
                .require_equals(true)
                .value_parser(["info", "debug", "trace"])
                .default_missing_value("info"),
        )
        .subcommand(
            sul_args(Command::new("test").about("runs test words against the SUL"))
                .arg(
                    Arg::new("word")
                        .long("word")
                        .required(true)
                        .action(ArgAction::Append)
                        .help("space separated inputs, may be given more than once"),
                )
                .arg(
                    Arg::new("times")
                        .long("times")
                        .value_parser(value_parser!(usize))
                        .default_value("1"),
                ),
        )
        .subcommand(
            sul_args(Command::new("learn").about("learns a Mealy machine of the SUL"))
                .arg(
                    Arg::new("runs")
                        .long("runs")
                        .value_parser(value_parser!(usize))
                        .default_value("1")
                        .help("executions of every membership query"),
                )
                .arg(
                    Arg::new("retries")
                        .long("retries")
                        .value_parser(value_parser!(usize))
                        .default_value("3"),
                )
                .arg(
                    Arg::new("no-sanitization")
                        .long("no-sanitization")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("ce-reruns")
                        .long("ce-reruns")
                        .value_parser(value_parser!(usize))
                        .default_value("3"),
                )
                .arg(
                    Arg::new("strict-sanitization")
                        .long("strict-sanitization")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("skip-non-det")
                        .long("skip-non-det")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("cache-tests")
                        .long("cache-tests")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("round-limit")
                        .long("round-limit")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("queries")
                        .long("queries")
                        .value_parser(value_parser!(usize))
                        .default_value("1000"),
                )
                .arg(
                    Arg::new("min-length")
                        .long("min-length")
                        .value_parser(value_parser!(usize))
                        .default_value("5"),
                )
                .arg(
                    Arg::new("max-length")
                        .long("max-length")
                        .value_parser(value_parser!(usize))
                        .default_value("15"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .value_parser(value_parser!(u64))
                        .default_value("0"),
                )
                .arg(
                    Arg::new("tests")
                        .long("tests")
                        .value_parser(value_parser!(PathBuf))
                        .help("file with one test word per line, run before random words"),
                )
                .arg(
                    Arg::new("query-file")
                        .long("query-file")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("non-det-file")
                        .long("non-det-file")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("dot")
                        .long("dot")
                        .value_parser(value_parser!(PathBuf))
                        .help("file to write the learned model to"),
                ),
        )
}

fn setup_logging(matches: &ArgMatches) {
    let level = match matches
        .try_get_one::<String>("verbosity")
        .ok()
        .flatten()
        .map(|m| m.as_str())
    {
        Some("trace") => filter::LevelFilter::TRACE,
        Some("debug") => filter::LevelFilter::DEBUG,
        Some("info") => filter::LevelFilter::INFO,
        _ => filter::LevelFilter::WARN,
    };

    let stderr_log = tracing_subscriber::fmt::layer()
        .pretty()
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(stderr_log.with_filter(level))
        .init();

    trace!("setup {level} logging");
}

fn sul_config(matches: &ArgMatches) -> Result<SulConfig, Box<dyn Error>> {
    let mut config = SulConfig::default();
    if matches.get_flag("server") {
        config.transport_role = TransportRole::Server;
    }
    if matches.get_flag("responder") {
        config.protocol_role = ProtocolRole::Responder;
    }
    if let Some(address) = matches.get_one::<String>("address") {
        config.address = address.clone();
    }
    if let Some(wait) = matches.get_one::<u64>("response-wait") {
        config.response_wait = Duration::from_millis(*wait);
    }
    if let Some(timeouts) = matches.get_one::<String>("input-timeouts") {
        config.input_response_timeout = parse_input_timeouts(timeouts)?;
    }
    config.command = matches.get_one::<String>("command").cloned();
    config.reset_port = matches.get_one::<u16>("reset-port").copied();
    config.socket_closed_as_timeout = matches.get_flag("socket-closed-as-timeout");
    Ok(config)
}

fn learning_config(matches: &ArgMatches, sul: &SulConfig) -> LearningConfig {
    let mut config = LearningConfig {
        time_limit: matches
            .get_one::<u64>("time-limit")
            .map(|s| Duration::from_secs(*s)),
        test_limit: matches.get_one::<i64>("test-limit").copied(),
        ..LearningConfig::for_sul(sul)
    };
    // the options below only exist for `learn`
    let usize_arg = |name: &str, default: usize| {
        matches
            .try_get_one::<usize>(name)
            .ok()
            .flatten()
            .copied()
            .unwrap_or(default)
    };
    config.runs_per_membership_query = usize_arg("runs", config.runs_per_membership_query);
    config.membership_query_retries = usize_arg("retries", config.membership_query_retries);
    config.ce_reruns = usize_arg("ce-reruns", config.ce_reruns);
    config.queries = usize_arg("queries", config.queries);
    config.min_length = usize_arg("min-length", config.min_length);
    config.max_length = usize_arg("max-length", config.max_length);
    let flag = |name: &str| matches.try_get_one::<bool>(name).ok().flatten().copied() == Some(true);
    config.ce_sanitization = !flag("no-sanitization");
    config.probabilistic_sanitization = !flag("strict-sanitization");
    config.skip_non_det_tests = flag("skip-non-det");
    config.cache_tests = flag("cache-tests");
    config.round_limit = matches.try_get_one::<usize>("round-limit").ok().flatten().copied();
    if let Ok(Some(seed)) = matches.try_get_one::<u64>("seed") {
        config.seed = *seed;
    }
    config.query_file = matches.try_get_one::<PathBuf>("query-file").ok().flatten().cloned();
    config.non_det_file = matches.try_get_one::<PathBuf>("non-det-file").ok().flatten().cloned();
    config
}

/// Builds the wrapped SUL for the script given on the command line.
fn wrapped_sul(
    matches: &ArgMatches,
    sul_config: SulConfig,
    config: &LearningConfig,
) -> Result<(InputAlphabet, SulWrapper), Box<dyn Error>> {
    let script = matches
        .get_one::<PathBuf>("script")
        .ok_or("a script is required")?;
    debug!("reading protocol script {}", script.display());
    let protocol = ScriptedProtocol::parse(&fs::read_to_string(script)?)?;
    let alphabet = InputAlphabet::new(protocol.inputs())?;
    info!("alphabet {}", alphabet.names());

    let sul = ProtocolSul::udp(sul_config, protocol)?;
    let mut wrapper = SulWrapper::wrap(sul);
    if config.time_limit.is_some() {
        wrapper.set_time_limit(config.time_limit);
    }
    if config.test_limit.is_some() {
        wrapper.set_test_limit(config.test_limit);
    }
    Ok((alphabet, wrapper))
}

fn test(matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let sul_config = sul_config(matches)?;
    let config = learning_config(matches, &sul_config);
    let (alphabet, wrapper) = wrapped_sul(matches, sul_config, &config)?;
    let cleanup = wrapper.cleanup_tasks();
    let times = matches.get_one::<usize>("times").copied().unwrap_or(1);

    let mut runner = TestRunner::new(SulOracle::new(wrapper.into_sul()));
    let mut outcome = Ok(());
    for word in matches.get_many::<String>("word").into_iter().flatten() {
        let word = match alphabet.parse_word(word) {
            Ok(word) => word,
            Err(e) => {
                outcome = Err(e.into());
                break;
            }
        };
        match runner.run_test(&word, times) {
            Ok(result) => {
                let verdict = if result.is_deterministic() {
                    "deterministic".green().to_string()
                } else {
                    "non-deterministic".red().to_string()
                };
                println!("{result}\n{verdict}");
            }
            Err(e) => {
                outcome = Err(e.into());
                break;
            }
        }
    }
    drop(runner);
    cleanup.execute();
    outcome
}

fn read_tests(path: &Path, alphabet: &InputAlphabet) -> Result<Vec<InputWord>, Box<dyn Error>> {
    let mut tests = vec![];
    for line in fs::read_to_string(path)?.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        tests.push(alphabet.parse_word(line)?);
    }
    Ok(tests)
}

fn learn(matches: &ArgMatches) -> Result<(), Box<dyn Error>> {
    let sul_config = sul_config(matches)?;
    let config = learning_config(matches, &sul_config);
    let (alphabet, wrapper) = wrapped_sul(matches, sul_config, &config)?;
    let tracker = StatisticsTracker::new(wrapper.symbol_counter(), wrapper.reset_counter());
    let cleanup = wrapper.cleanup_tasks();

    let logs = OracleLogs::from_config(&config)?;
    let oracles = build_oracles(wrapper.into_sul(), &config, &logs);
    let testing = SharedOracle::new(oracles.testing);

    let mut equivalence = EquivalenceChain::new();
    if let Some(path) = matches.get_one::<PathBuf>("tests") {
        let tests = read_tests(path, &alphabet)?;
        info!("{} sampled tests", tests.len());
        equivalence = equivalence.with(SampledTestsOracle::new(testing.clone(), tests));
    }
    equivalence = equivalence.with(RandomWordsOracle::new(
        testing,
        config.min_length,
        config.max_length,
        config.queries,
        config.seed,
    ));

    let start = std::time::Instant::now();
    let learner = MealyLStar::new(alphabet, oracles.membership);
    let result = LearningDriver::new(learner, equivalence, oracles.slot)
        .with_round_limit(config.round_limit)
        .with_tracker(tracker)
        .with_cleanup(cleanup)
        .run();
    info!(
        "learning took {}",
        statefuzz_core::show_duration(start.elapsed())
    );

    println!("{}", result.statistics);
    match &result.reason {
        None => println!("{}", "learning finished".green()),
        Some(reason) => println!("{} {reason}", "learning stopped:".red()),
    }
    if let (Some(model), Some(path)) = (&result.model, matches.get_one::<PathBuf>("dot")) {
        fs::write(path, model.to_dot())?;
        info!("model written to {}", path.display());
    }
    Ok(())
}

pub fn main() {
    let matches = cli().get_matches();

    setup_logging(&matches);

    let outcome = match matches.subcommand() {
        Some(("test", sub_matches)) => test(sub_matches),
        Some(("learn", sub_matches)) => learn(sub_matches),
        _ => unreachable!(),
    };
    if let Err(e) = outcome {
        error!("{e}");
        eprintln!("{} {e}", "error:".red());
        std::process::exit(1);
    }
}
