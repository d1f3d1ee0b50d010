use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use sable::backend::cranelift::CraneliftBackend;
use sable::backend::Backend;
use sable::lexer::token::TokenKind;
use sable::lexer::Lexer;
use sable::parser::printer;
use sable::{CompileError, Compiler};

fn main() {
    if let Err(err) = run() {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

struct Options {
    emit_ir: bool,
    print_ast: bool,
    dump_tokens: bool,
    optimize: bool,
    run_main: bool,
    output: Option<PathBuf>,
}

fn run() -> Result<(), String> {
    let args = env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() {
        return Err(usage());
    }

    let mut inputs: Vec<String> = Vec::new();
    let mut options = Options {
        emit_ir: false,
        print_ast: false,
        dump_tokens: false,
        optimize: false,
        run_main: false,
        output: None,
    };

    let mut index = 0;
    while index < args.len() {
        let arg = &args[index];
        match arg.as_str() {
            "--emit-ir" => options.emit_ir = true,
            "--print-ast" => options.print_ast = true,
            "--dump-tokens" => options.dump_tokens = true,
            "-O" | "--optimize" => options.optimize = true,
            "--run" => options.run_main = true,
            "--emit-obj" => {
                index += 1;
                let Some(path) = args.get(index) else {
                    return Err("--emit-obj requires a path".to_string());
                };
                options.output = Some(PathBuf::from(path));
            }
            _ if arg.starts_with("--emit-obj=") => {
                let Some(path) = arg.strip_prefix("--emit-obj=") else {
                    unreachable!();
                };
                options.output = Some(PathBuf::from(path));
            }
            _ if arg.starts_with('-') => {
                return Err(format!("unknown option '{}'", arg));
            }
            _ => inputs.push(arg.clone()),
        }
        index += 1;
    }

    if inputs.is_empty() {
        return Err(usage());
    }

    for path in &inputs {
        compile_file(path, &options)?;
    }

    Ok(())
}

fn compile_file(path: &str, options: &Options) -> Result<(), String> {
    let source =
        fs::read_to_string(path).map_err(|err| format!("{}: error: {}", path, err))?;

    if options.dump_tokens {
        dump_tokens(path, &source)?;
    }

    let compiler = Compiler::new().with_optimization(options.optimize);
    let sequence = compiler
        .parse_source(&source)
        .map_err(|err| format_error(path, &err))?;

    if options.print_ast {
        print!("{}", printer::print_declaration_sequence(&sequence));
    }

    let module_name = Path::new(path)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("main");
    let module = compiler
        .compile_sequence(&sequence, module_name)
        .map_err(|err| format_error(path, &err))?;

    if options.emit_ir {
        println!("{}", module);
    }

    let backend = CraneliftBackend::new()
        .map_err(|err| format_error(path, &err))?
        .with_optimization(options.optimize);

    let object_bytes = backend
        .generate(&module)
        .map_err(|err| format_error(path, &err))?;
    let output = options
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from("output.o"));
    fs::write(&output, object_bytes)
        .map_err(|err| format!("{}: error: {}", output.display(), err))?;
    println!(
        "wrote object file {} ({})",
        output.display(),
        backend.target()
    );

    if options.run_main {
        #[cfg(feature = "cranelift-backend")]
        {
            let exit_code = backend
                .run_main(&module)
                .map_err(|err| format_error(path, &err))?;
            println!("program exited with code {}", exit_code);
        }
        #[cfg(not(feature = "cranelift-backend"))]
        return Err(format!(
            "{}: error: --run requires the cranelift-backend feature",
            path
        ));
    }

    Ok(())
}

fn dump_tokens(path: &str, source: &str) -> Result<(), String> {
    let mut lexer = Lexer::new(source);
    loop {
        match lexer.next_token() {
            Some(token) if token.kind == TokenKind::Eof => return Ok(()),
            Some(token) => println!("{}: {}", token.kind, token.spelling),
            None => {
                return Err(format!("{}: error: unknown character in input", path));
            }
        }
    }
}

/// Parse errors carry a position and print as `path:line:column: error: ...`;
/// everything else prints as `path: error: ...`.
fn format_error(path: &str, error: &CompileError) -> String {
    match error {
        CompileError::Parse(parse) => format!(
            "{}:{}:{}: error: {}",
            path, parse.line, parse.column, parse.message
        ),
        other => format!("{}: error: {}", path, other),
    }
}

fn usage() -> String {
    "usage: sable <file.sb>... [--emit-ir] [--print-ast] [--dump-tokens] [--emit-obj <path>] [-O] [--run]"
        .to_string()
}
