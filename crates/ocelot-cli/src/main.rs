use std::{env, fs, process::ExitCode};

use ocelot::{EmptyActivation, Env, JsonActivation};

const USAGE: &str = "usage: ocelot <expression> [--vars <json-object>] [--vars-file <path>] [--cost]";

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut expression: Option<String> = None;
    let mut vars_json: Option<String> = None;
    let mut show_cost = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--vars" => {
                let Some(value) = args.get(i + 1) else {
                    eprintln!("{USAGE}");
                    return ExitCode::FAILURE;
                };
                vars_json = Some(value.clone());
                i += 2;
            }
            "--vars-file" => {
                let Some(path) = args.get(i + 1) else {
                    eprintln!("{USAGE}");
                    return ExitCode::FAILURE;
                };
                match fs::read_to_string(path) {
                    Ok(text) => vars_json = Some(text),
                    Err(err) => {
                        eprintln!("error reading {path}: {err}");
                        return ExitCode::FAILURE;
                    }
                }
                i += 2;
            }
            "--cost" => {
                show_cost = true;
                i += 1;
            }
            "--help" | "-h" => {
                println!("{USAGE}");
                return ExitCode::SUCCESS;
            }
            other => {
                if expression.is_some() {
                    eprintln!("unexpected argument {other:?}\n{USAGE}");
                    return ExitCode::FAILURE;
                }
                expression = Some(other.to_owned());
                i += 1;
            }
        }
    }

    let Some(expression) = expression else {
        eprintln!("{USAGE}");
        return ExitCode::FAILURE;
    };

    // Variables are untyped JSON, so skip the checker and resolve by kind
    // at runtime.
    let env = Env::builder().disable_type_checking().build();
    let program = match env.compile(&expression) {
        Ok(program) => program,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    if show_cost {
        eprintln!("static cost bound: {}", program.cost());
    }

    let outcome = match vars_json {
        Some(text) => match JsonActivation::from_json_text(&text) {
            Ok(activation) => program.eval(&activation),
            Err(err) => {
                eprintln!("invalid --vars JSON: {err}");
                return ExitCode::FAILURE;
            }
        },
        None => program.eval(&EmptyActivation),
    };

    match outcome.error {
        Some(error) => {
            eprintln!("{error}");
            ExitCode::FAILURE
        }
        None => {
            println!("{}", outcome.value);
            ExitCode::SUCCESS
        }
    }
}
