use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::warn;

use servo_core::OperatorCommand;

pub fn show_menu() {
    println!("\n===========================================");
    println!("Hand Servo Control");
    println!("===========================================");
    println!("Select an option:");
    println!("1. Threaded Session");
    println!("2. Async Session");
    println!("3. Compare Open Loop vs Closed Loop");
    println!("4. Show Configuration");
    println!("5. Exit");
    println!("===========================================");
    print!("Choice (1-5): ");
    let _ = io::stdout().flush();
}

pub fn get_user_choice() -> io::Result<Option<u32>> {
    let mut input = String::new();
    if io::stdin().read_line(&mut input)? == 0 {
        return Ok(None);
    }
    Ok(input.trim().parse::<u32>().ok().or(Some(0)))
}

pub fn wait_for_enter() {
    println!("\nPress Enter to return to menu...");
    let mut input = String::new();
    let _ = io::stdin().read_line(&mut input);
}

pub fn show_controls() {
    println!("Controls (type and press Enter):");
    println!("  q            quit the session");
    println!("  d            toggle the debug overlay");
    println!("  r            reset to workspace center");
    println!("  m            toggle open/closed loop");
    println!("  open|closed  select a control mode");
    println!("  kp|ki|kd <v> set a PID gain");
    println!("  alpha <v>    set the smoothing factor");
    println!("  e            export the session so far");
}

/// Forwards parsed stdin lines to a running session. The thread exits after
/// forwarding `q`, on EOF, when `send` reports the session gone, or on the
/// first line read after `session_over` is raised.
pub fn spawn_operator_reader<F>(mut send: F, session_over: Arc<AtomicBool>) -> JoinHandle<()>
where
    F: FnMut(OperatorCommand) -> bool + Send + 'static,
{
    thread::spawn(move || {
        let stdin = io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            if session_over.load(Ordering::Relaxed) {
                break;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match OperatorCommand::parse(trimmed) {
                Some(command) => {
                    if !send(command) || command == OperatorCommand::Quit {
                        break;
                    }
                }
                None => warn!(input = trimmed, "unrecognised operator input"),
            }
        }
    })
}
