use clap::{Arg, Command};

use gilgamesh::analysis::Analysis;
use gilgamesh::error::AnalysisError;
use gilgamesh::rom::Rom;
use gilgamesh::snes::state::State;

fn main() -> Result<(), AnalysisError> {
    env_logger::init();

    let matches = Command::new("gilgamesh-analysis")
        .version("0.1.0")
        .author("Andrea Orru <andrea@orru.io>")
        .about("Static 65816 disassembly analyzer for SNES ROMs")
        .arg(Arg::new("ROM").required(true).help("ROM file to analyze"))
        .get_matches();

    let rom_path = matches
        .get_one::<String>("ROM")
        .ok_or_else(|| AnalysisError::MissingArgument("ROM".to_string()))?;

    let rom = Rom::from_path(rom_path)?;

    let mut analysis = Analysis::new(rom);
    let native = State::from_mxe(false, false, false);
    analysis.add_entry_point("reset", analysis.rom().reset_vector(), native);
    analysis.add_entry_point("nmi", analysis.rom().nmi_vector(), native);
    analysis.run();

    for (pc, subroutine) in analysis.subroutines() {
        print!("{:06X} {}: {} instructions", pc, subroutine.label(), subroutine.instructions().len());
        if subroutine.is_unknown() {
            let reason = subroutine.unknown_state_changes().iter().next().and_then(|c| c.unknown_reason());
            print!(" (unknown: {:?})", reason);
        }
        println!();
    }

    Ok(())
}
