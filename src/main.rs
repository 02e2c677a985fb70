// `sh4dbg`: an interactive terminal debugger over the `sh4` core. Same
// termion cursor/color register-grid drawing and single-letter command
// loop read from stdin as a classic instruction-set debugger, adapted to
// SH4 register/opcode dumps and to `Sh4::set_breakpoint` for arming
// breakpoints instead of an ad hoc address set.

use std::io::{stdin, stdout, Write};

use sh4::config::{RomImage, Sh4Config};
use sh4::{BreakpointKind, Sh4};
use termion::{clear, color, cursor};

const SLICE_NANOS: u64 = 1_000_000; // 1ms of simulated time per "continue" tick

#[derive(PartialEq, Clone)]
enum DebugCommand {
    Quit,
    SetBreakpoint(Option<String>),
    DeleteBreakpoint(Option<String>),
    Continue,
    Step,
    Unknown,
}

fn parse_address(arg: &Option<String>) -> Option<u32> {
    let s = arg.as_ref()?;
    u32::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

fn get_command(last: &DebugCommand) -> DebugCommand {
    let mut input = String::new();
    if stdin().read_line(&mut input).is_err() {
        return DebugCommand::Quit;
    }
    let mut cmd = input.split_whitespace();
    match cmd.next() {
        Some("q") => DebugCommand::Quit,
        Some("s") | Some("n") => DebugCommand::Step,
        Some("b") => DebugCommand::SetBreakpoint(cmd.next().map(String::from)),
        Some("d") => DebugCommand::DeleteBreakpoint(cmd.next().map(String::from)),
        Some("c") => DebugCommand::Continue,
        None => last.clone(),
        _ => DebugCommand::Unknown,
    }
}

fn draw_registers(sh4: &Sh4) {
    let regs = &sh4.cpu().regs;
    print!("{}{}", clear::All, cursor::Goto(1, 1));
    println!("pc:  {:08x}   pr:  {:08x}   sr:  {:08x}", regs.pc, regs.pr, regs.sr);
    println!("gbr: {:08x}   vbr: {:08x}   mac: {:012x}", regs.gbr, regs.vbr, regs.mac);
    for row in 0..4 {
        let mut line = String::new();
        for col in 0..4 {
            let i = row * 4 + col;
            line.push_str(&format!("r{i:<2}: {:08x}   ", regs.r[i]));
        }
        println!("{line}");
    }
    println!(
        "{g}state:{n} {} {g}int_pending:{n} {}",
        regs.sh4_state,
        regs.int_pending,
        g = color::Fg(color::Green),
        n = color::Fg(color::Reset),
    );
}

fn draw_prompt() {
    print!("\nsh4dbg> ");
    stdout().flush().expect("stdout flush failed");
}

fn main() {
    env_logger::init();

    let rom_path = std::env::args().nth(1);
    let use_xlat = std::env::args().any(|a| a == "--xlat");

    let config = Sh4Config {
        rom_image: rom_path.map(|path| RomImage {
            path: path.into(),
            base: 0x0000_0000,
            expected_crc: None,
        }),
        use_translator: use_xlat,
        ..Sh4Config::default()
    };

    let mut sh4 = Sh4::new(config).expect("failed to build sh4 core");
    sh4.init();

    let mut last_cmd = DebugCommand::Step;
    loop {
        draw_registers(&sh4);
        draw_prompt();
        let cmd = get_command(&last_cmd);
        match cmd {
            DebugCommand::Quit => break,
            DebugCommand::SetBreakpoint(addr) => match parse_address(&addr) {
                Some(pc) => {
                    sh4.set_breakpoint(pc, BreakpointKind::Permanent);
                    println!("breakpoint set at {pc:08x}");
                }
                None => println!("invalid address"),
            },
            DebugCommand::DeleteBreakpoint(addr) => match parse_address(&addr) {
                Some(pc) => {
                    sh4.clear_breakpoint(pc);
                    println!("breakpoint cleared at {pc:08x}");
                }
                None => println!("invalid address"),
            },
            DebugCommand::Step => {
                if let Err(e) = sh4.run_slice(sh4.cpu().cpu_period_ns) {
                    println!("core stopped: {e}");
                    break;
                }
                last_cmd = DebugCommand::Step;
            }
            DebugCommand::Continue => match sh4.run_slice(SLICE_NANOS) {
                Ok(_) => {}
                Err(e) => {
                    println!("core stopped: {e}");
                    break;
                }
            },
            DebugCommand::Unknown => {
                println!("commands: n/s step, c continue, b/d <addr> set/delete breakpoint, q quit");
            }
        }
    }
}
