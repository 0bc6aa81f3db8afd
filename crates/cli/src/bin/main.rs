//! `lua` command-line driver: option parsing, script/stdin execution,
//! and a REPL. No `package.path`/`require`, no `-W`/`-E`, since there is
//! no module loader or warning subsystem here.

use lua51_runtime::{LuaState, LuaValue};
use std::env;
use std::io::{self, BufRead, Write};

const VERSION: &str = "Lua 5.1 (lua51_runtime)";

fn print_usage() {
    eprintln!("usage: lua [options] [script [args]]");
    eprintln!("Available options are:");
    eprintln!("  -e stat   execute string 'stat'");
    eprintln!("  -i        enter interactive mode after executing 'script'");
    eprintln!("  -l mod    load './mod.lua' into global 'mod'");
    eprintln!("  -v        show version information");
    eprintln!("  --        stop handling options");
    eprintln!("  -         stop handling options and execute stdin");
}

fn print_version() {
    println!("{}", VERSION);
}

#[derive(Default)]
struct Options {
    execute_strings: Vec<String>,
    interactive: bool,
    script_file: Option<String>,
    script_args: Vec<String>,
    require_modules: Vec<String>,
    show_version: bool,
    read_stdin: bool,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut opts = Options::default();
    let mut i = 1;
    let mut stop_options = false;

    while i < args.len() {
        let arg = &args[i];

        if !stop_options && arg.starts_with('-') && arg.len() > 1 {
            match arg.as_str() {
                "-e" => {
                    i += 1;
                    if i >= args.len() {
                        return Err("'-e' needs argument".to_string());
                    }
                    opts.execute_strings.push(args[i].clone());
                }
                "-i" => opts.interactive = true,
                "-l" => {
                    i += 1;
                    if i >= args.len() {
                        return Err("'-l' needs argument".to_string());
                    }
                    opts.require_modules.push(args[i].clone());
                }
                "-v" => opts.show_version = true,
                "--" => stop_options = true,
                _ => return Err(format!("unrecognized option '{}'", arg)),
            }
        } else if !stop_options && arg == "-" {
            opts.read_stdin = true;
            stop_options = true;
        } else {
            opts.script_file = Some(arg.clone());
            i += 1;
            opts.script_args = args[i..].to_vec();
            break;
        }
        i += 1;
    }

    Ok(opts)
}

fn setup_arg_table(state: &mut LuaState, script_name: Option<&str>, args: &[String]) {
    let table = state.create_table();
    if let Some(name) = script_name {
        let v = state.intern(name);
        state.set_array(table, 0, v);
    }
    for (i, a) in args.iter().enumerate() {
        let v = state.intern(a);
        state.set_array(table, (i + 1) as i64, v);
    }
    state.set_global("arg", table);
}

/// No `require`/`package` surface exists in this crate's stdlib, so
/// `-l mod` is approximated by loading `./mod.lua` and binding its
/// first return value to the global `mod`.
fn load_module(state: &mut LuaState, module: &str) -> Result<(), String> {
    let path = std::path::PathBuf::from(format!("{}.lua", module));
    let results = state
        .do_file(&path)
        .map_err(|e| format!("cannot load module '{}': {}", module, e))?;
    let value = results.into_iter().next().unwrap_or(LuaValue::Nil);
    state.set_global(module, value);
    Ok(())
}

fn run_source(state: &mut LuaState, source: &str) -> Result<Vec<LuaValue>, String> {
    state.do_string(source).map_err(|e| e.to_string())
}

fn run_file(state: &mut LuaState, filename: &str) -> Result<Vec<LuaValue>, String> {
    state
        .do_file(std::path::Path::new(filename))
        .map_err(|e| e.to_string())
}

fn run_stdin(state: &mut LuaState) -> Result<Vec<LuaValue>, String> {
    use std::io::Read;
    let mut source = String::new();
    io::stdin()
        .lock()
        .read_to_string(&mut source)
        .map_err(|e| format!("error reading stdin: {}", e))?;
    run_source(state, &source)
}

fn run_repl(state: &mut LuaState) {
    println!("{}", VERSION);
    println!("Type Ctrl+D to exit");

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let mut pending = String::new();

    loop {
        if pending.is_empty() {
            print!("> ");
        } else {
            print!(">> ");
        }
        io::stdout().flush().ok();

        let line = match lines.next() {
            Some(Ok(line)) => line,
            _ => break,
        };

        if !pending.is_empty() {
            pending.push('\n');
        }
        pending.push_str(&line);

        // Try it as an expression first so bare values print their result,
        // the way the standalone interpreter does.
        let as_expr = format!("return {}", pending);
        let source = if state.compiles(&as_expr) {
            as_expr
        } else {
            pending.clone()
        };

        match state.do_string(&source) {
            Ok(results) => {
                if let Some(first) = results.into_iter().next() {
                    println!("{}", state.tostring_value(first));
                }
                pending.clear();
            }
            Err(e) => {
                let msg = e.to_string();
                if msg.ends_with("<eof>") || msg.contains("unexpected end") {
                    continue;
                }
                eprintln!("{}", msg);
                pending.clear();
            }
        }
    }
}

fn main() {
    // Lua calls recurse through the dispatch loop one native stack frame
    // per nested `CALL`; give
    // the interpreter room before it hits the OS default limit.
    let builder = std::thread::Builder::new()
        .name("lua-main".into())
        .stack_size(16 * 1024 * 1024);
    let handle = builder.spawn(lua_main).expect("failed to spawn lua-main thread");
    match handle.join() {
        Ok(code) => std::process::exit(code),
        Err(_) => {
            eprintln!("lua: internal error (thread panicked)");
            std::process::exit(1);
        }
    }
}

fn lua_main() -> i32 {
    let args: Vec<String> = env::args().collect();
    let opts = match parse_args(&args) {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("lua: {}", e);
            print_usage();
            return 1;
        }
    };

    if opts.show_version {
        print_version();
        if opts.execute_strings.is_empty() && opts.script_file.is_none() && !opts.read_stdin {
            return 0;
        }
    }

    let mut state = LuaState::new();
    state.open_libs();

    if let Some(init) = env::var("LUA_INIT").ok() {
        let result = if let Some(filename) = init.strip_prefix('@') {
            run_file(&mut state, filename)
        } else {
            run_source(&mut state, &init)
        };
        if let Err(e) = result {
            eprintln!("lua: {}", e);
            return 1;
        }
    }

    setup_arg_table(&mut state, opts.script_file.as_deref(), &opts.script_args);

    for module in &opts.require_modules {
        if let Err(e) = load_module(&mut state, module) {
            eprintln!("lua: {}", e);
            return 1;
        }
    }

    for code in &opts.execute_strings {
        if let Err(e) = run_source(&mut state, code) {
            eprintln!("lua: {}", e);
            return 1;
        }
    }

    if let Some(filename) = &opts.script_file {
        if let Err(e) = run_file(&mut state, filename) {
            eprintln!("lua: {}", e);
            return 1;
        }
    } else if opts.read_stdin {
        if let Err(e) = run_stdin(&mut state) {
            eprintln!("lua: {}", e);
            return 1;
        }
    }

    if opts.interactive
        || (opts.execute_strings.is_empty() && opts.script_file.is_none() && !opts.read_stdin)
    {
        run_repl(&mut state);
    }

    0
}
