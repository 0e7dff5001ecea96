//! Checkers board representation and rules engine (spec §4.2).
//!
//! Coordinates grow downward: row 0 is the top, white men advance toward
//! row 0, black men advance toward row 7. `validate` never mutates the
//! board; `apply` is deterministic given a validated move.

use serde::Serialize;
use std::fmt;

pub const BOARD_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn opposite(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    /// The row-delta a man of this color advances along (forward direction).
    fn forward_row_delta(self) -> i32 {
        match self {
            Color::White => -1,
            Color::Black => 1,
        }
    }

    /// The back rank a man of this color promotes on reaching.
    fn promotion_row(self) -> i32 {
        match self {
            Color::White => 0,
            Color::Black => (BOARD_SIZE - 1) as i32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    Empty,
    WhiteMan,
    WhiteKing,
    BlackMan,
    BlackKing,
}

impl Cell {
    pub fn color(self) -> Option<Color> {
        match self {
            Cell::WhiteMan | Cell::WhiteKing => Some(Color::White),
            Cell::BlackMan | Cell::BlackKing => Some(Color::Black),
            Cell::Empty => None,
        }
    }

    pub fn is_king(self) -> bool {
        matches!(self, Cell::WhiteKing | Cell::BlackKing)
    }

    pub fn is_empty(self) -> bool {
        matches!(self, Cell::Empty)
    }

    fn promoted(self) -> Cell {
        match self {
            Cell::WhiteMan => Cell::WhiteKing,
            Cell::BlackMan => Cell::BlackKing,
            other => other,
        }
    }

    /// Wire encoding (spec §6 "Board encoding").
    pub fn encode(self) -> u8 {
        match self {
            Cell::Empty => 0,
            Cell::WhiteMan => 1,
            Cell::WhiteKing => 2,
            Cell::BlackMan => 3,
            Cell::BlackKing => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Square {
    pub row: i32,
    pub col: i32,
}

impl Square {
    pub fn new(row: i32, col: i32) -> Self {
        Self { row, col }
    }

    pub fn in_bounds(self) -> bool {
        (0..BOARD_SIZE as i32).contains(&self.row) && (0..BOARD_SIZE as i32).contains(&self.col)
    }

    pub fn is_dark(self) -> bool {
        (self.row + self.col) % 2 == 0
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.row, self.col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    Normal,
    Capture,
    MultiCapture,
}

/// A single committed step: source, destination, captured cells along the
/// traversed diagonal, and whether it produced a king.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    pub kind: MoveKind,
    pub captured: Vec<Square>,
    /// Intermediate landing squares for a multi-capture path (excludes `from`, includes `to`).
    pub path: Vec<Square>,
    pub promoted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Board {
    cells: [[Cell; BOARD_SIZE]; BOARD_SIZE],
}

impl Board {
    /// The standard checkers starting position: black on rows 0-2, white on rows 5-7.
    pub fn starting_position() -> Self {
        let mut cells = [[Cell::Empty; BOARD_SIZE]; BOARD_SIZE];
        for row in 0..BOARD_SIZE {
            for col in 0..BOARD_SIZE {
                let sq = Square::new(row as i32, col as i32);
                if !sq.is_dark() {
                    continue;
                }
                if row < 3 {
                    cells[row][col] = Cell::BlackMan;
                } else if row > 4 {
                    cells[row][col] = Cell::WhiteMan;
                }
            }
        }
        Self { cells }
    }

    pub fn get(&self, sq: Square) -> Cell {
        if !sq.in_bounds() {
            return Cell::Empty;
        }
        self.cells[sq.row as usize][sq.col as usize]
    }

    fn set(&mut self, sq: Square, cell: Cell) {
        self.cells[sq.row as usize][sq.col as usize] = cell;
    }

    pub fn count_color(&self, color: Color) -> usize {
        self.cells
            .iter()
            .flatten()
            .filter(|c| c.color() == Some(color))
            .count()
    }

    /// Row-major encoded grid for `GAME_STATE` (spec §6 "Board encoding").
    pub fn encode_rows(&self) -> Vec<Vec<u8>> {
        self.cells
            .iter()
            .map(|row| row.iter().map(|c| c.encode()).collect())
            .collect()
    }

    /// Cells strictly between `from` and `to` along a diagonal, in traversal order.
    fn diagonal_between(from: Square, to: Square) -> Vec<Square> {
        let dr = (to.row - from.row).signum();
        let dc = (to.col - from.col).signum();
        let steps = (to.row - from.row).abs();
        (1..steps)
            .map(|i| Square::new(from.row + dr * i, from.col + dc * i))
            .collect()
    }

    /// Validates a single step in isolation (spec §4.2 "Move legality (single step)").
    /// Pure: never mutates `self`.
    pub fn validate_step(&self, from: Square, to: Square, mover: Color) -> Result<Move, &'static str> {
        if !from.in_bounds() || !to.in_bounds() {
            return Err("out of bounds");
        }
        let piece = self.get(from);
        if piece.color() != Some(mover) {
            return Err("no piece of yours at source");
        }
        if !self.get(to).is_empty() {
            return Err("destination occupied");
        }
        let dr = to.row - from.row;
        let dc = to.col - from.col;
        if dr.abs() != dc.abs() || dr == 0 {
            return Err("move must be diagonal");
        }

        let is_king = piece.is_king();

        if dr.abs() == 1 {
            if is_king {
                return self.finish_simple(from, to, piece);
            }
            if dr != mover.forward_row_delta() {
                return Err("men may only move forward");
            }
            return self.finish_simple(from, to, piece);
        }

        // Longer diagonal: a man may only take this as a 2-step capture; a
        // king may slide or capture any distance.
        if !is_king && dr.abs() != 2 {
            return Err("men may only move one step or capture two");
        }

        let between = Self::diagonal_between(from, to);
        if !is_king && between.len() != 1 {
            return Err("men may only capture the adjacent midpoint");
        }

        let mut enemies = Vec::new();
        for sq in &between {
            match self.get(*sq) {
                Cell::Empty => {}
                c if c.color() == Some(mover) => return Err("cannot jump your own piece"),
                _ => enemies.push(*sq),
            }
        }

        if enemies.len() != 1 {
            return Err("capture must cross exactly one enemy piece");
        }

        let promoted = to.row == mover.promotion_row() && !is_king;
        Ok(Move {
            from,
            to,
            kind: MoveKind::Capture,
            captured: enemies,
            path: vec![to],
            promoted,
        })
    }

    fn finish_simple(&self, from: Square, to: Square, piece: Cell) -> Result<Move, &'static str> {
        let mover = piece.color().expect("validated above");
        let promoted = to.row == mover.promotion_row() && !piece.is_king();
        Ok(Move {
            from,
            to,
            kind: MoveKind::Normal,
            captured: Vec::new(),
            path: vec![to],
            promoted,
        })
    }

    /// Commits a validated move: relocates the piece, clears captures,
    /// promotes on reaching the back rank.
    pub fn apply(&mut self, mv: &Move) {
        let piece = self.get(mv.from);
        self.set(mv.from, Cell::Empty);
        for sq in &mv.captured {
            self.set(*sq, Cell::Empty);
        }
        let final_piece = if mv.promoted { piece.promoted() } else { piece };
        self.set(mv.to, final_piece);
    }

    /// Validates and folds an entire multi-capture path (spec §4.2
    /// "Multi-capture"): each step must be a capture, legal against the
    /// board state produced by its predecessors, and no cell captured twice.
    pub fn validate_multi_capture(
        &self,
        steps: &[Square],
        mover: Color,
    ) -> Result<Move, &'static str> {
        if steps.len() < 2 {
            return Err("multi-capture needs at least two squares");
        }
        let mut board = *self;
        let mut all_captured: Vec<Square> = Vec::new();
        let mut path = Vec::new();

        for window in steps.windows(2) {
            let (from, to) = (window[0], window[1]);
            let step = board.validate_step(from, to, mover)?;
            if step.kind != MoveKind::Capture {
                return Err("every intermediate step of a multi-capture must be a capture");
            }
            for sq in &step.captured {
                if all_captured.contains(sq) {
                    return Err("cannot capture the same piece twice");
                }
            }
            all_captured.extend(step.captured.iter().copied());
            board.apply(&step);
            path.push(to);
        }

        let from = steps[0];
        let to = *steps.last().unwrap();
        let final_color = board.get(steps[steps.len() - 2]);
        let promoted = to.row == mover.promotion_row() && !final_color.is_king();

        Ok(Move {
            from,
            to,
            kind: MoveKind::MultiCapture,
            captured: all_captured,
            path,
            promoted,
        })
    }
}

/// Paired player names, color assignment, and the embedded board (spec §3 "Game").
#[derive(Debug, Clone)]
pub struct Game {
    pub board: Board,
    pub player1: String,
    pub player2: String,
    pub current_turn: String,
    pub active: bool,
}

impl Game {
    /// `player1` joins first and plays white; `player2` plays black.
    pub fn new(player1: String, player2: String) -> Self {
        let current_turn = player1.clone();
        Self {
            board: Board::starting_position(),
            player1,
            player2,
            current_turn,
            active: true,
        }
    }

    pub fn color_of(&self, player: &str) -> Option<Color> {
        if player == self.player1 {
            Some(Color::White)
        } else if player == self.player2 {
            Some(Color::Black)
        } else {
            None
        }
    }

    pub fn opponent_of<'a>(&'a self, player: &str) -> &'a str {
        if player == self.player1 {
            &self.player2
        } else {
            &self.player1
        }
    }

    pub fn is_current_mover(&self, player: &str) -> bool {
        self.current_turn == player
    }

    fn flip_turn(&mut self) {
        self.current_turn = self.opponent_of(&self.current_turn).to_string();
    }

    /// Applies a single validated step and flips the turn (spec §4.2 "Application").
    pub fn commit_step(&mut self, from: Square, to: Square, player: &str) -> Result<(), &'static str> {
        let color = self.color_of(player).ok_or("unknown player")?;
        let mv = self.board.validate_step(from, to, color)?;
        self.board.apply(&mv);
        self.flip_turn();
        Ok(())
    }

    /// Applies a validated multi-capture path and flips the turn exactly once.
    pub fn commit_multi_capture(&mut self, steps: &[Square], player: &str) -> Result<(), &'static str> {
        let color = self.color_of(player).ok_or("unknown player")?;
        let mv = self.board.validate_multi_capture(steps, color)?;
        self.board.apply(&mv);
        self.flip_turn();
        Ok(())
    }

    /// Termination check (spec §4.2 "Termination"): a color with zero
    /// pieces loses. Returns the winning player's name.
    pub fn winner(&self) -> Option<&str> {
        if self.board.count_color(Color::White) == 0 {
            Some(&self.player2)
        } else if self.board.count_color(Color::Black) == 0 {
            Some(&self.player1)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starting_position_has_24_pieces() {
        let b = Board::starting_position();
        assert_eq!(b.count_color(Color::White), 12);
        assert_eq!(b.count_color(Color::Black), 12);
    }

    #[test]
    fn non_diagonal_move_rejected() {
        let b = Board::starting_position();
        let err = b
            .validate_step(Square::new(5, 1), Square::new(5, 3), Color::White)
            .unwrap_err();
        assert_eq!(err, "move must be diagonal");
    }

    #[test]
    fn white_man_simple_forward_move() {
        let b = Board::starting_position();
        let mv = b
            .validate_step(Square::new(5, 1), Square::new(4, 0), Color::White)
            .unwrap();
        assert_eq!(mv.kind, MoveKind::Normal);
    }

    #[test]
    fn white_man_cannot_move_backward() {
        let b = Board::starting_position();
        let err = b
            .validate_step(Square::new(5, 1), Square::new(6, 0), Color::White)
            .unwrap_err();
        assert_eq!(err, "men may only move forward");
    }

    #[test]
    fn validate_does_not_mutate_board() {
        let b = Board::starting_position();
        let before = b;
        let _ = b.validate_step(Square::new(5, 1), Square::new(4, 0), Color::White);
        assert_eq!(b, before);
    }

    #[test]
    fn capture_removes_midpoint_piece() {
        let mut b = Board::starting_position();
        // Clear a path: move a black man to (4,2) to be captured.
        b.apply(&Move {
            from: Square::new(2, 2),
            to: Square::new(4, 2),
            kind: MoveKind::Normal,
            captured: vec![],
            path: vec![Square::new(4, 2)],
            promoted: false,
        });
        let mv = b
            .validate_step(Square::new(5, 1), Square::new(3, 3), Color::White)
            .unwrap();
        assert_eq!(mv.kind, MoveKind::Capture);
        assert_eq!(mv.captured, vec![Square::new(4, 2)]);
        b.apply(&mv);
        assert!(b.get(Square::new(4, 2)).is_empty());
        assert_eq!(b.get(Square::new(3, 3)), Cell::WhiteMan);
        assert!(b.get(Square::new(5, 1)).is_empty());
    }

    fn empty_board() -> Board {
        let mut b = Board::starting_position();
        for r in 0..BOARD_SIZE {
            for c in 0..BOARD_SIZE {
                let sq = Square::new(r as i32, c as i32);
                if sq.is_dark() {
                    b.set(sq, Cell::Empty);
                }
            }
        }
        b
    }

    #[test]
    fn king_slides_any_distance_on_empty_diagonal() {
        let mut b = empty_board();
        b.set(Square::new(7, 0), Cell::WhiteKing);
        let mv = b
            .validate_step(Square::new(7, 0), Square::new(3, 4), Color::White)
            .unwrap();
        assert_eq!(mv.kind, MoveKind::Normal);
    }

    #[test]
    fn king_capture_rejects_two_enemies_on_path() {
        let mut b = empty_board();
        b.set(Square::new(7, 0), Cell::WhiteKing);
        b.set(Square::new(5, 2), Cell::BlackMan);
        b.set(Square::new(3, 4), Cell::BlackMan);
        let err = b
            .validate_step(Square::new(7, 0), Square::new(2, 5), Color::White)
            .unwrap_err();
        assert_eq!(err, "capture must cross exactly one enemy piece");
    }

    #[test]
    fn man_promotes_on_back_rank() {
        let mut b = empty_board();
        b.set(Square::new(1, 1), Cell::WhiteMan);
        let mv = b
            .validate_step(Square::new(1, 1), Square::new(0, 0), Color::White)
            .unwrap();
        assert!(mv.promoted);
        b.apply(&mv);
        assert_eq!(b.get(Square::new(0, 0)), Cell::WhiteKing);
    }

    #[test]
    fn multi_capture_applies_all_steps_once() {
        let mut b = empty_board();
        b.set(Square::new(7, 1), Cell::WhiteMan);
        b.set(Square::new(6, 2), Cell::BlackMan);
        b.set(Square::new(4, 4), Cell::BlackMan);
        let steps = vec![Square::new(7, 1), Square::new(5, 3), Square::new(3, 5)];
        let mv = b.validate_multi_capture(&steps, Color::White).unwrap();
        assert_eq!(mv.kind, MoveKind::MultiCapture);
        assert_eq!(mv.captured.len(), 2);
        b.apply(&mv);
        assert!(b.get(Square::new(6, 2)).is_empty());
        assert!(b.get(Square::new(4, 4)).is_empty());
        assert_eq!(b.get(Square::new(3, 5)), Cell::WhiteMan);
    }

    #[test]
    fn multi_capture_rejects_recapture_of_same_piece() {
        let mut b = empty_board();
        b.set(Square::new(7, 1), Cell::WhiteMan);
        b.set(Square::new(6, 2), Cell::BlackMan);
        // Looping back across the same captured piece is illegal since the
        // midpoint is now empty (no enemy there anymore) -- validated by the
        // normal step-capture rule, exercised here via a path that tries to
        // recross after the piece is gone.
        let steps = vec![
            Square::new(7, 1),
            Square::new(5, 3),
            Square::new(7, 1),
        ];
        assert!(b.validate_multi_capture(&steps, Color::White).is_err());
    }

    #[test]
    fn turn_alternates_after_commit() {
        let mut game = Game::new("john".into(), "ann".into());
        assert_eq!(game.current_turn, "john");
        game.commit_step(Square::new(5, 1), Square::new(4, 0), "john").unwrap();
        assert_eq!(game.current_turn, "ann");
    }

    #[test]
    fn multi_capture_flips_turn_exactly_once() {
        let mut game = Game::new("john".into(), "ann".into());
        game.board = empty_board();
        game.board.set(Square::new(7, 1), Cell::WhiteMan);
        game.board.set(Square::new(6, 2), Cell::BlackMan);
        game.board.set(Square::new(4, 4), Cell::BlackMan);
        let steps = vec![Square::new(7, 1), Square::new(5, 3), Square::new(3, 5)];
        game.commit_multi_capture(&steps, "john").unwrap();
        assert_eq!(game.current_turn, "ann");
    }

    #[test]
    fn winner_detected_when_a_color_is_wiped_out() {
        let mut game = Game::new("john".into(), "ann".into());
        game.board = empty_board();
        game.board.set(Square::new(5, 1), Cell::WhiteMan);
        assert_eq!(game.winner(), Some("john"));
    }
}
