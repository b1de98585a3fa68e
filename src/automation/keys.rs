//! Key-combination and pointer injection via rdev.

use std::thread;
use std::time::Duration;

use rdev::{simulate, Button, EventType, Key};
use tracing::debug;

/// Delay between simulated input events so the target window keeps up.
const EVENT_DELAY: Duration = Duration::from_millis(20);

fn send(event: &EventType) -> anyhow::Result<()> {
    simulate(event).map_err(|e| anyhow::anyhow!("Input injection failed: {e:?}"))?;
    thread::sleep(EVENT_DELAY);
    Ok(())
}

/// Map one token of a combination ("ctrl", "shift", "f5", "a") to a key.
fn key_from_name(name: &str) -> Option<Key> {
    let key = match name {
        "ctrl" | "control" => Key::ControlLeft,
        "shift" => Key::ShiftLeft,
        "alt" => Key::Alt,
        "win" | "super" | "meta" | "cmd" => Key::MetaLeft,
        "enter" | "return" => Key::Return,
        "esc" | "escape" => Key::Escape,
        "tab" => Key::Tab,
        "space" => Key::Space,
        "backspace" => Key::Backspace,
        "delete" | "del" => Key::Delete,
        "insert" => Key::Insert,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" => Key::PageUp,
        "pagedown" => Key::PageDown,
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        "a" => Key::KeyA,
        "b" => Key::KeyB,
        "c" => Key::KeyC,
        "d" => Key::KeyD,
        "e" => Key::KeyE,
        "f" => Key::KeyF,
        "g" => Key::KeyG,
        "h" => Key::KeyH,
        "i" => Key::KeyI,
        "j" => Key::KeyJ,
        "k" => Key::KeyK,
        "l" => Key::KeyL,
        "m" => Key::KeyM,
        "n" => Key::KeyN,
        "o" => Key::KeyO,
        "p" => Key::KeyP,
        "q" => Key::KeyQ,
        "r" => Key::KeyR,
        "s" => Key::KeyS,
        "t" => Key::KeyT,
        "u" => Key::KeyU,
        "v" => Key::KeyV,
        "w" => Key::KeyW,
        "x" => Key::KeyX,
        "y" => Key::KeyY,
        "z" => Key::KeyZ,
        "0" => Key::Num0,
        "1" => Key::Num1,
        "2" => Key::Num2,
        "3" => Key::Num3,
        "4" => Key::Num4,
        "5" => Key::Num5,
        "6" => Key::Num6,
        "7" => Key::Num7,
        "8" => Key::Num8,
        "9" => Key::Num9,
        _ => return None,
    };
    Some(key)
}

/// Parse a `+`-separated combination like "ctrl+shift+t" into keys, in the
/// order given (modifiers first by convention, but not enforced).
pub fn parse_combo(combo: &str) -> anyhow::Result<Vec<Key>> {
    let keys: Vec<Key> = combo
        .split('+')
        .map(|part| {
            let token = part.trim().to_lowercase();
            key_from_name(&token)
                .ok_or_else(|| anyhow::anyhow!("Unknown key in combination: {part}"))
        })
        .collect::<anyhow::Result<_>>()?;
    anyhow::ensure!(!keys.is_empty(), "Empty key combination");
    Ok(keys)
}

/// Press a key combination: press in order, release in reverse.
pub fn press_combo(combo: &str) -> anyhow::Result<()> {
    let keys = parse_combo(combo)?;
    debug!(combo = %combo, "Pressing key combination");
    for key in &keys {
        send(&EventType::KeyPress(*key))?;
    }
    for key in keys.iter().rev() {
        send(&EventType::KeyRelease(*key))?;
    }
    Ok(())
}

/// Move the pointer to absolute screen coordinates and left-click once.
pub fn click_at(x: i32, y: i32) -> anyhow::Result<()> {
    debug!(x, y, "Clicking");
    send(&EventType::MouseMove {
        x: x as f64,
        y: y as f64,
    })?;
    send(&EventType::ButtonPress(Button::Left))?;
    send(&EventType::ButtonRelease(Button::Left))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_combo_modifiers_and_letter() {
        let keys = parse_combo("ctrl+shift+t").unwrap();
        assert_eq!(keys, vec![Key::ControlLeft, Key::ShiftLeft, Key::KeyT]);
    }

    #[test]
    fn test_parse_combo_is_case_insensitive() {
        let keys = parse_combo("Ctrl+W").unwrap();
        assert_eq!(keys, vec![Key::ControlLeft, Key::KeyW]);
    }

    #[test]
    fn test_parse_combo_named_keys() {
        assert_eq!(parse_combo("enter").unwrap(), vec![Key::Return]);
        assert_eq!(parse_combo("alt+f4").unwrap(), vec![Key::Alt, Key::F4]);
        assert_eq!(
            parse_combo("win+d").unwrap(),
            vec![Key::MetaLeft, Key::KeyD]
        );
    }

    #[test]
    fn test_parse_combo_rejects_unknown_key() {
        assert!(parse_combo("ctrl+frobnicate").is_err());
        assert!(parse_combo("").is_err());
    }
}
