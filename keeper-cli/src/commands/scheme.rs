//! `keeper scheme check <file>`

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use colored::Colorize;

use keeper_policy::{compile_file, SchemeError};

#[derive(Subcommand, Debug)]
pub enum SchemeCommand {
    /// Compile a scheme file and report every invalid line.
    Check {
        /// Scheme file to compile.
        file: PathBuf,
    },
}

pub fn run(command: &SchemeCommand) -> Result<()> {
    match command {
        SchemeCommand::Check { file } => check(file),
    }
}

fn check(file: &std::path::Path) -> Result<()> {
    match compile_file(file) {
        Ok(scheme) => {
            println!(
                "{} {} rule(s) in {}",
                "valid:".green().bold(),
                scheme.instructions().len(),
                file.display()
            );
            for (index, instruction) in scheme.instructions().iter().enumerate() {
                println!("  {:>2}. {instruction}", index + 1);
            }
            Ok(())
        }
        Err(SchemeError::Invalid(errors)) => {
            eprintln!(
                "{} {} invalid line(s) in {}; the default policy would be used",
                "invalid:".red().bold(),
                errors.len(),
                file.display()
            );
            for error in &errors {
                eprintln!("  {error}");
            }
            bail!("scheme rejected");
        }
        Err(err) => Err(err).with_context(|| format!("failed to read scheme {}", file.display())),
    }
}
