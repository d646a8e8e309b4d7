use unjsr::jvm::class_file::ClassFile;
use unjsr::jvm::verifier::ClassVerifier;
use unjsr::rewrite::{ClassRewriter, Error, Settings};

use clap::{crate_version, value_parser, Arg, ArgAction, ArgMatches, Command};
use std::path::{Path, PathBuf};

fn main() -> Result<(), Error> {
    env_logger::init();

    let matches = Command::new("unjsr")
        .version(crate_version!())
        .about("Rewrite JVM class files so that no method uses jsr/ret subroutines")
        .arg(
            Arg::new("INPUT")
                .help("Class files to rewrite")
                .required(true)
                .num_args(1..)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("output-dir")
                .short('o')
                .long("output-dir")
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .help("Write rewritten classes here (instead of overwriting the inputs)"),
        )
        .arg(
            Arg::new("inline-all")
                .long("inline-all")
                .action(ArgAction::SetTrue)
                .help("Rewrite every method, even those without subroutines"),
        )
        .arg(
            Arg::new("keep-going")
                .short('k')
                .long("keep-going")
                .action(ArgAction::SetTrue)
                .help("Leave failing methods unchanged instead of stopping"),
        )
        .arg(
            Arg::new("keep-stack-maps")
                .long("keep-stack-maps")
                .action(ArgAction::SetTrue)
                .help("Skip methods with a StackMapTable instead of dropping the table"),
        )
        .arg(
            Arg::new("verify-only")
                .long("verify-only")
                .action(ArgAction::SetTrue)
                .help("Only verify the classes, without writing anything"),
        )
        .get_matches();

    let settings = Settings {
        inline_all: matches.get_flag("inline-all"),
        keep_going: matches.get_flag("keep-going"),
        drop_stack_map_tables: !matches.get_flag("keep-stack-maps"),
        ..Settings::new()
    };

    let failed = if matches.get_flag("verify-only") {
        verify(&matches, &settings)?
    } else {
        rewrite(&matches, settings)?
    };

    if failed > 0 {
        return Err(Error::MethodsFailed { failed });
    }
    Ok(())
}

fn inputs(matches: &ArgMatches) -> impl Iterator<Item = &PathBuf> {
    matches.get_many::<PathBuf>("INPUT").into_iter().flatten()
}

/// Verify every input, returning the number of methods that failed
fn verify(matches: &ArgMatches, settings: &Settings) -> Result<usize, Error> {
    let verifier = ClassVerifier::new()
        .allow_fallback(settings.allow_fallback)
        .keep_going(settings.keep_going);

    let mut failed = 0;
    for input in inputs(matches) {
        log::info!("Verifying '{}'", input.display());
        let class = ClassFile::from_path(input)?;
        for verification in verifier.verify_class(&class) {
            match verification.outcome {
                Ok(_) => log::info!("{}: ok", verification.method),
                Err(err) if settings.keep_going => {
                    log::debug!("{}: {}", verification.method, err);
                    failed += 1;
                }
                Err(source) => {
                    return Err(Error::Method {
                        method: verification.method,
                        source,
                    })
                }
            }
        }
    }
    Ok(failed)
}

/// Rewrite every input, returning the number of methods that failed
fn rewrite(matches: &ArgMatches, settings: Settings) -> Result<usize, Error> {
    let output_dir = matches.get_one::<PathBuf>("output-dir");
    let rewriter = ClassRewriter::new(settings);

    let mut failed = 0;
    for input in inputs(matches) {
        let output = output_path(input, output_dir.map(PathBuf::as_path));
        let report = rewriter.rewrite_file(input, &output)?;
        for method in &report.rewritten {
            log::info!("Inlined subroutines in {}", method);
        }
        failed += report.failures.len();
    }
    Ok(failed)
}

fn output_path(input: &Path, output_dir: Option<&Path>) -> PathBuf {
    match (output_dir, input.file_name()) {
        (Some(dir), Some(file_name)) => dir.join(file_name),
        _ => input.to_owned(),
    }
}
