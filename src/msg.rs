use crossterm::event::KeyEvent;
use std::path::PathBuf;

/// Direction for moving the catalog highlight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Top,
    Bottom,
}

/// All possible messages that drive state transitions.
#[derive(Debug)]
pub enum Msg {
    // -- Input events (raw)
    Key(KeyEvent),
    Resize,

    // -- Project / catalog I/O
    LoadCatalog,
    OpenProject(PathBuf),

    // -- Install run
    Apply,
    Cancel,

    // -- System
    Tick,
    Quit,
}
