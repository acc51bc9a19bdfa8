use std::{
    io::{self, Write},
    process::ExitCode,
};

use ocelot::{EmptyActivation, Env};

fn main() -> ExitCode {
    // REPL input has no declared variables, so the checker would reject
    // every identifier; fall back to runtime resolution instead.
    let env = Env::builder().disable_type_checking().build();

    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 {
        // One-shot mode: evaluate the expression argument and exit.
        let expr = args[1..].join(" ");
        return match evaluate(&env, &expr) {
            Ok(rendered) => {
                println!("{rendered}");
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("{err}");
                ExitCode::FAILURE
            }
        };
    }

    loop {
        let Some(line) = read_line("> ") else {
            println!();
            return ExitCode::SUCCESS;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == ":quit" || line == ":q" {
            return ExitCode::SUCCESS;
        }
        match evaluate(&env, line) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => eprintln!("{err}"),
        }
    }
}

fn evaluate(env: &Env, expr: &str) -> Result<String, String> {
    let program = env.compile(expr).map_err(|e| e.to_string())?;
    let outcome = program.eval(&EmptyActivation);
    match outcome.error {
        Some(error) => Err(error),
        None => Ok(outcome.value.to_string()),
    }
}

fn read_line(prompt: &str) -> Option<String> {
    print!("{prompt}");
    io::stdout().flush().ok()?;
    let mut line = String::new();
    match io::stdin().read_line(&mut line) {
        Ok(0) => None,
        Ok(_) => Some(line.trim_end_matches('\n').to_owned()),
        Err(_) => None,
    }
}
