//! Per-conversation tic-tac-toe sessions and the win leaderboard.

use forka_identity::CanonicalId;
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;

const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    X,
    O,
}

impl Mark {
    pub fn other(self) -> Self {
        match self {
            Self::X => Self::O,
            Self::O => Self::X,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::X => "❌",
            Self::O => "⭕",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveError {
    #[error("No game is running in this chat")]
    NoSession,
    #[error("Pick a cell between 1 and 9")]
    OutOfRange,
    #[error("You are not playing in this game")]
    NotAPlayer,
    #[error("It is not your turn")]
    NotYourTurn,
    #[error("Cell {0} is already taken")]
    Occupied(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    #[error("A game is already running in this chat")]
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Continue { next: Mark },
    Won { winner: CanonicalId, mark: Mark },
    Draw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicTacToe {
    board: [Option<Mark>; 9],
    player_x: CanonicalId,
    player_o: Option<CanonicalId>,
    turn: Mark,
}

impl TicTacToe {
    pub fn new(creator: CanonicalId) -> Self {
        Self {
            board: [None; 9],
            player_x: creator,
            player_o: None,
            turn: Mark::X,
        }
    }

    pub fn player_x(&self) -> &CanonicalId {
        &self.player_x
    }

    pub fn player_o(&self) -> Option<&CanonicalId> {
        self.player_o.as_ref()
    }

    pub fn turn(&self) -> Mark {
        self.turn
    }

    /// The player holding `mark`, if bound.
    pub fn player(&self, mark: Mark) -> Option<&CanonicalId> {
        match mark {
            Mark::X => Some(&self.player_x),
            Mark::O => self.player_o.as_ref(),
        }
    }

    pub fn is_player(&self, id: &CanonicalId) -> bool {
        &self.player_x == id || self.player_o.as_ref() == Some(id)
    }

    pub fn cell(&self, position: u8) -> Option<Mark> {
        usize::from(position)
            .checked_sub(1)
            .and_then(|index| self.board.get(index).copied().flatten())
    }

    /// Applies a move for `actor` at `position` (1-9). The second player is
    /// bound on their first valid move.
    pub fn play(&mut self, actor: &CanonicalId, position: u8) -> Result<MoveOutcome, MoveError> {
        if !(1..=9).contains(&position) {
            return Err(MoveError::OutOfRange);
        }

        let mark = if actor == &self.player_x {
            Mark::X
        } else {
            match &self.player_o {
                Some(player_o) if player_o == actor => Mark::O,
                Some(_) => return Err(MoveError::NotAPlayer),
                None => Mark::O,
            }
        };

        if mark != self.turn {
            return Err(MoveError::NotYourTurn);
        }

        let index = usize::from(position - 1);
        if self.board[index].is_some() {
            return Err(MoveError::Occupied(position));
        }

        if self.player_o.is_none() && mark == Mark::O {
            self.player_o = Some(actor.clone());
        }
        self.board[index] = Some(mark);

        if self.winner() == Some(mark) {
            return Ok(MoveOutcome::Won {
                winner: actor.clone(),
                mark,
            });
        }
        if self.board.iter().all(Option::is_some) {
            return Ok(MoveOutcome::Draw);
        }

        self.turn = mark.other();
        Ok(MoveOutcome::Continue { next: self.turn })
    }

    pub fn winner(&self) -> Option<Mark> {
        LINES.iter().find_map(|line| {
            let first = self.board[line[0]]?;
            line.iter()
                .all(|&i| self.board[i] == Some(first))
                .then_some(first)
        })
    }

    /// Three rows of marks, free cells shown by their number.
    pub fn render(&self) -> String {
        const DIGITS: [&str; 9] = ["1️⃣", "2️⃣", "3️⃣", "4️⃣", "5️⃣", "6️⃣", "7️⃣", "8️⃣", "9️⃣"];
        self.board
            .chunks(3)
            .enumerate()
            .map(|(row, cells)| {
                cells
                    .iter()
                    .enumerate()
                    .map(|(col, cell)| match cell {
                        Some(mark) => mark.symbol(),
                        None => DIGITS[row * 3 + col],
                    })
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Result of a move, with the board as it stood right after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveReport {
    pub outcome: MoveOutcome,
    pub game: TicTacToe,
}

/// At most one game per conversation, plus per-conversation win counts.
#[derive(Debug, Default)]
pub struct GameSessionStore {
    sessions: HashMap<String, TicTacToe>,
    wins: HashMap<String, HashMap<CanonicalId, u32>>,
}

impl GameSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, conversation_id: &str, creator: CanonicalId) -> Result<&TicTacToe, StartError> {
        if self.sessions.contains_key(conversation_id) {
            return Err(StartError::AlreadyRunning);
        }
        info!("Tic-tac-toe started in {} by {}", conversation_id, creator);
        Ok(self
            .sessions
            .entry(conversation_id.to_string())
            .or_insert_with(|| TicTacToe::new(creator)))
    }

    pub fn get(&self, conversation_id: &str) -> Option<&TicTacToe> {
        self.sessions.get(conversation_id)
    }

    pub fn has_session(&self, conversation_id: &str) -> bool {
        self.sessions.contains_key(conversation_id)
    }

    /// Plays a move; finished games are removed and wins recorded.
    pub fn play(
        &mut self,
        conversation_id: &str,
        actor: &CanonicalId,
        position: u8,
    ) -> Result<MoveReport, MoveError> {
        let game = self
            .sessions
            .get_mut(conversation_id)
            .ok_or(MoveError::NoSession)?;
        let outcome = game.play(actor, position)?;
        let game = game.clone();

        match &outcome {
            MoveOutcome::Won { winner, .. } => {
                self.sessions.remove(conversation_id);
                *self
                    .wins
                    .entry(conversation_id.to_string())
                    .or_default()
                    .entry(winner.clone())
                    .or_insert(0) += 1;
                info!("Tic-tac-toe in {} won by {}", conversation_id, winner);
            }
            MoveOutcome::Draw => {
                self.sessions.remove(conversation_id);
                info!("Tic-tac-toe in {} ended in a draw", conversation_id);
            }
            MoveOutcome::Continue { .. } => {}
        }

        Ok(MoveReport { outcome, game })
    }

    pub fn end(&mut self, conversation_id: &str) -> Option<TicTacToe> {
        let removed = self.sessions.remove(conversation_id);
        if removed.is_some() {
            info!("Tic-tac-toe in {} aborted", conversation_id);
        }
        removed
    }

    /// Win counts for a conversation, most wins first.
    pub fn leaderboard(&self, conversation_id: &str) -> Vec<(CanonicalId, u32)> {
        let mut entries: Vec<(CanonicalId, u32)> = self
            .wins
            .get(conversation_id)
            .map(|wins| wins.iter().map(|(id, n)| (id.clone(), *n)).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }
}
