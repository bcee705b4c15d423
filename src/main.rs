// JH: a small source-to-bytecode compiler and stack-based virtual
// machine.
//
// Copyright (C) 2020  Brandon Lewis
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use jh::{bytecode, codegen, grammar, vm};

#[derive(Parser)]
#[command(name = "jh", about = "A small source-to-bytecode compiler and virtual machine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a `.jh` source file to the textual bytecode format.
    ///
    /// The bytecode is written alongside the source, with the `.jh`
    /// extension stripped.
    Compile {
        file: PathBuf,
    },
    /// Run a compiled bytecode file and print the value `main` returns.
    Vm {
        bytecode_file: PathBuf,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("code generation error: {0}")]
    Codegen(#[from] codegen::CodegenError),
    #[error("bytecode error: {0}")]
    Bytecode(#[from] bytecode::BytecodeError),
    #[error("runtime error: {0}")]
    Vm(#[from] vm::VmError),
    #[error("source file must have a `.jh` extension: {0}")]
    BadExtension(PathBuf),
}

fn compile(file: &Path) -> Result<(), CliError> {
    if file.extension().and_then(|e| e.to_str()) != Some("jh") {
        return Err(CliError::BadExtension(file.to_path_buf()));
    }
    let source = fs::read_to_string(file)?;
    let ast = grammar::ProgramParser::new()
        .parse(&source)
        .map_err(|e| CliError::Parse(format!("{:?}", e)))?;
    let program = codegen::generate(&ast)?;

    let out_path = file.with_extension("");
    let mut out = fs::File::create(&out_path)?;
    bytecode::encode(&program, &mut out)?;
    log::info!("{} successfully compiled.", out_path.display());
    Ok(())
}

fn run_vm(file: &Path) -> Result<(), CliError> {
    let f = fs::File::open(file)?;
    let program = bytecode::decode(&mut BufReader::new(f))?;
    let result = vm::run(program)?;
    println!("{:?}", result);
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Compile { file } => compile(&file),
        Command::Vm { bytecode_file } => run_vm(&bytecode_file),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("jh: {}", e);
            ExitCode::FAILURE
        }
    }
}
