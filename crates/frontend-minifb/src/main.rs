//! Button board simulator frontend.
//!
//! Provides three execution modes:
//!
//! - **GUI mode** (default): one cell per button, bound keys press them live.
//! - **Headless mode** (`--headless --script FILE`): runs a script and prints
//!   the final line levels.
//! - **Console mode** (`--console`): interactive script prompt.
//!
//! Logging goes through `env_logger`; set `RUST_LOG` or pass `--debug`.

use avr_parts_core::config::{parse_button_spec, BoardConfig};
use avr_parts_core::keys::Key as SimKey;
use avr_parts_core::telemetry;
use avr_parts_core::{Board, CLOCK_HZ};
use minifb::{Key, KeyRepeat, Window, WindowOptions};
use std::env;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

/// Size of one button cell in pixels
const CELL: usize = 48;
/// Gap between cells
const GAP: usize = 8;
const COLOR_IDLE: u32 = 0x00E0_E0E0;
const COLOR_PRESSED: u32 = 0x0020_2020;
const COLOR_BG: u32 = 0x0060_6070;
/// Simulated time per GUI frame (60 fps)
const FRAME_USEC: u64 = 16_667;

// ─── Options ────────────────────────────────────────────────────────────────

struct Options {
    board: BoardConfig,
    headless: bool,
    console: bool,
    debug: bool,
    script: Option<String>,
    /// Extra simulated time after the script (headless)
    run_usec: u64,
    capture: Option<String>,
    vcd: Option<String>,
}

fn usage(prog: &str) {
    eprintln!("Button board simulator");
    eprintln!("Usage: {} --button NAME[:KEY][:toggle][:HOLD_US] ... [options]", prog);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --button SPEC        Add a button (repeatable)");
    eprintln!("  --hold USEC          Hold time for every momentary button (default 500)");
    eprintln!("  --clock HZ           Board clock (default {})", CLOCK_HZ);
    eprintln!("  --headless           Run without GUI");
    eprintln!("  --script FILE        Run script lines from FILE");
    eprintln!("  --usec N             Simulated time to run after the script (headless)");
    eprintln!("  --console            Interactive script console");
    eprintln!("  --capture FILE       Save trace capture on exit");
    eprintln!("  --vcd FILE           Write VCD trace on exit");
    eprintln!("  --debug              Debug logging");
    eprintln!("  --show-capture FILE  Print a saved capture as VCD and exit");
    eprintln!();
    eprintln!("GUI keys: bound button keys, F1=Help, Esc=Quit");
}

fn option_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter().position(|a| a == name).and_then(|i| args.get(i + 1)).map(String::as_str)
}

fn parse_options(args: &[String]) -> Result<Options, String> {
    let mut board = BoardConfig::default();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--button" {
            let spec = args.get(i + 1).ok_or("--button needs a value")?;
            let cfg = parse_button_spec(spec).map_err(|e| e.to_string())?;
            board.push_button(cfg).map_err(|e| e.to_string())?;
            i += 2;
        } else { i += 1; }
    }
    if board.buttons.is_empty() {
        return Err("no buttons given".into());
    }
    if let Some(s) = option_value(args, "--hold") {
        let usec = s.parse().map_err(|_| format!("bad --hold value {:?}", s))?;
        board.set_hold_usec(usec);
    }
    if let Some(s) = option_value(args, "--clock") {
        board.clock_hz = s.parse().map_err(|_| format!("bad --clock value {:?}", s))?;
    }
    let run_usec = match option_value(args, "--usec") {
        Some(s) => s.parse().map_err(|_| format!("bad --usec value {:?}", s))?,
        None => 0,
    };
    Ok(Options {
        board,
        headless: args.iter().any(|a| a == "--headless"),
        console: args.iter().any(|a| a == "--console"),
        debug: args.iter().any(|a| a == "--debug"),
        script: option_value(args, "--script").map(str::to_string),
        run_usec,
        capture: option_value(args, "--capture").map(str::to_string),
        vcd: option_value(args, "--vcd").map(str::to_string),
    })
}

fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

// ─── Main ───────────────────────────────────────────────────────────────────

fn main() {
    let args: Vec<String> = env::args().collect();
    if let Some(path) = option_value(&args, "--show-capture") {
        if let Err(e) = show_capture(path) {
            eprintln!("Error: {}: {}", path, e);
            std::process::exit(1);
        }
        return;
    }
    let opts = match parse_options(&args[1..]) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            usage(&args[0]);
            std::process::exit(1);
        }
    };
    init_logging(opts.debug);

    let mut board = match Board::from_config(&opts.board) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    log::debug!("Board: {} buttons at {} Hz", board.buttons().len(), board.ctx.scheduler.clock_hz());

    if let Some(ref path) = opts.script {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("Error: {}: {}", path, e);
                std::process::exit(1);
            }
        };
        if let Err((line, e)) = board.run_script(&text) {
            eprintln!("Error: {}:{}: {}", path, line, e);
            std::process::exit(1);
        }
    }

    if opts.console {
        run_console(&mut board);
    } else if opts.headless {
        run_headless(&mut board, opts.run_usec);
    } else {
        run_gui(&mut board);
    }

    if let Err(e) = write_traces(&board, &opts) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn write_traces(board: &Board, opts: &Options) -> Result<(), String> {
    let hz = board.ctx.scheduler.clock_hz();
    if let Some(ref path) = opts.capture {
        board.ctx.telemetry.save_capture(hz, Path::new(path))
            .map_err(|e| format!("{}: {}", path, e))?;
        log::info!("Capture: {} ({} events)", path, board.ctx.telemetry.events().len());
    }
    if let Some(ref path) = opts.vcd {
        let mut out = fs::File::create(path).map_err(|e| format!("{}: {}", path, e))?;
        board.ctx.telemetry.write_vcd(&mut out, hz).map_err(|e| format!("{}: {}", path, e))?;
        log::info!("VCD: {}", path);
    }
    Ok(())
}

fn show_capture(path: &str) -> Result<(), telemetry::CaptureError> {
    let capture = telemetry::load_capture(Path::new(path))?;
    let stdout = std::io::stdout();
    telemetry::write_vcd(&capture, &mut stdout.lock())?;
    Ok(())
}

fn print_levels(board: &Board) {
    let usec = board.ctx.scheduler.cycles_to_usec(board.now());
    println!("t={} uSec ({} cycles)", usec, board.now());
    for b in board.buttons() {
        let mode = if b.is_toggle() { "toggle" } else { "momentary" };
        println!("  {:<12} {:<9} {}", b.name(), mode, b.value(&board.ctx));
    }
}

// ─── GUI Mode ───────────────────────────────────────────────────────────────

/// Map a minifb key to the simulator's key type.
fn sim_key(key: Key) -> Option<SimKey> {
    let c = match key {
        Key::A => 'a', Key::B => 'b', Key::C => 'c', Key::D => 'd', Key::E => 'e',
        Key::F => 'f', Key::G => 'g', Key::H => 'h', Key::I => 'i', Key::J => 'j',
        Key::K => 'k', Key::L => 'l', Key::M => 'm', Key::N => 'n', Key::O => 'o',
        Key::P => 'p', Key::Q => 'q', Key::R => 'r', Key::S => 's', Key::T => 't',
        Key::U => 'u', Key::V => 'v', Key::W => 'w', Key::X => 'x', Key::Y => 'y',
        Key::Z => 'z',
        Key::Key0 => '0', Key::Key1 => '1', Key::Key2 => '2', Key::Key3 => '3',
        Key::Key4 => '4', Key::Key5 => '5', Key::Key6 => '6', Key::Key7 => '7',
        Key::Key8 => '8', Key::Key9 => '9',
        Key::Space => ' ',
        _ => return None,
    };
    Some(SimKey::new(c))
}

fn render(board: &Board, buf: &mut [u32], width: usize) {
    buf.fill(COLOR_BG);
    for (n, b) in board.buttons().iter().enumerate() {
        let color = if b.value(&board.ctx) == 0 { COLOR_PRESSED } else { COLOR_IDLE };
        let x0 = GAP + n * (CELL + GAP);
        for y in GAP..GAP + CELL {
            let row = y * width;
            buf[row + x0..row + x0 + CELL].fill(color);
        }
    }
}

fn run_gui(board: &mut Board) {
    let width = GAP + board.buttons().len() * (CELL + GAP);
    let height = CELL + 2 * GAP;
    let mut window = match Window::new("Button board", width, height, WindowOptions::default()) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("Error: window: {}", e);
            return;
        }
    };
    window.set_target_fps(60);
    println!("{}", board.key_help());

    let mut buf = vec![0u32; width * height];
    let mut last_title = Instant::now();
    while window.is_open() && !window.is_key_down(Key::Escape) {
        for key in window.get_keys_pressed(KeyRepeat::No) {
            if key == Key::F1 {
                println!("{}\n{}", board.key_help(), board.menu());
                continue;
            }
            if let Some(k) = sim_key(key) {
                if !board.on_key(k) {
                    log::debug!("Key {} not bound", k);
                }
            }
        }

        board.run_usec(FRAME_USEC);

        render(board, &mut buf, width);
        if let Err(e) = window.update_with_buffer(&buf, width, height) {
            eprintln!("Error: window update: {}", e);
            break;
        }

        if last_title.elapsed() >= Duration::from_secs(1) {
            let ms = board.ctx.scheduler.cycles_to_usec(board.now()) / 1000;
            window.set_title(&format!("Button board - {} ms simulated", ms));
            last_title = Instant::now();
        }
    }
}

// ─── Console Mode ───────────────────────────────────────────────────────────

fn run_console(board: &mut Board) {
    println!("Console: Part::Action(args), menu=list actions, levels=show lines, q=quit");
    let stdin = std::io::stdin();
    loop {
        let mut line = String::new();
        print!("sim> ");
        let _ = std::io::stdout().flush();
        match stdin.read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        match line.trim() {
            "q" | "quit" => break,
            "menu" => { println!("{}", board.menu()); continue; }
            "levels" => { print_levels(board); continue; }
            _ => {}
        }
        match board.execute_line(&line) {
            Ok(status) => log::debug!("{:?}", status),
            Err(e) => println!("Error: {}", e),
        }
    }
    print_levels(board);
}

// ─── Headless Mode ──────────────────────────────────────────────────────────

fn run_headless(board: &mut Board, run_usec: u64) {
    board.run_usec(run_usec);
    print_levels(board);
    let pending = board.ctx.scheduler.pending();
    if pending > 0 {
        println!("  ({} timer(s) still pending)", pending);
    }
}
