//! `OpeningTable`: the game engine the server ships with.
//!
//! It sets up the opening of a Sequence game: two shuffled 52-card decks
//! and `max_hand_size` cards dealt round-robin to each seat, in roster
//! order. Board play is not part of the lobby server.

use rand::seq::SliceRandom;
use sequence_lobby::GameEngine;
use sequence_protocol::{Color, PlayerSnapshot, Settings, Username};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Suit {
    Spades,
    Hearts,
    Clubs,
    Diamonds,
}

impl Suit {
    pub const ALL: [Suit; 4] = [Suit::Spades, Suit::Hearts, Suit::Clubs, Suit::Diamonds];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Rank {
    Two = 2,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Ten,
    Jack,
    Queen,
    King,
    Ace,
}

impl Rank {
    pub const ALL: [Rank; 13] = [
        Rank::Two,
        Rank::Three,
        Rank::Four,
        Rank::Five,
        Rank::Six,
        Rank::Seven,
        Rank::Eight,
        Rank::Nine,
        Rank::Ten,
        Rank::Jack,
        Rank::Queen,
        Rank::King,
        Rank::Ace,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Card {
    pub rank: Rank,
    pub suit: Suit,
}

/// Draw pile plus discard pile.
#[derive(Debug, Clone)]
pub struct Deck {
    cards: Vec<Card>,
    discard: Vec<Card>,
}

impl Deck {
    /// Copies of every card in a Sequence deck.
    pub const COPIES: usize = 2;

    /// A full Sequence deck (two of every card), shuffled.
    pub fn new_shuffled() -> Self {
        let mut cards = Vec::with_capacity(Suit::ALL.len() * Rank::ALL.len() * Self::COPIES);
        for _ in 0..Self::COPIES {
            for suit in Suit::ALL {
                for rank in Rank::ALL {
                    cards.push(Card { rank, suit });
                }
            }
        }
        cards.shuffle(&mut rand::rng());
        Self {
            cards,
            discard: Vec::new(),
        }
    }

    /// Draws the top card. An empty draw pile is refilled from the
    /// shuffled discard pile first.
    pub fn draw(&mut self) -> Option<Card> {
        if self.cards.is_empty() {
            std::mem::swap(&mut self.cards, &mut self.discard);
            self.cards.shuffle(&mut rand::rng());
        }
        self.cards.pop()
    }

    pub fn discard(&mut self, card: Card) {
        self.discard.push(card);
    }

    /// Cards left in the draw pile.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

/// One player at the table.
#[derive(Debug, Clone)]
pub struct Seat {
    pub username: Username,
    pub color: Color,
    pub hand: Vec<Card>,
}

/// A game right after the deal.
#[derive(Debug, Clone)]
pub struct Table {
    seats: Vec<Seat>,
    deck: Deck,
    current: usize,
}

impl Table {
    pub fn seats(&self) -> &[Seat] {
        &self.seats
    }

    pub fn deck(&self) -> &Deck {
        &self.deck
    }

    /// The seat whose turn it is. The first seat opens.
    pub fn current_seat(&self) -> Option<&Seat> {
        self.seats.get(self.current)
    }
}

/// Deals opening hands for lobbies that start a game.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpeningTable;

impl GameEngine for OpeningTable {
    type Game = Table;

    fn start(settings: &Settings, players: &[PlayerSnapshot]) -> Table {
        let mut seats: Vec<Seat> = players
            .iter()
            .filter_map(|p| match p.color {
                Some(color) => Some(Seat {
                    username: p.username.clone(),
                    color,
                    hand: Vec::with_capacity(settings.max_hand_size),
                }),
                None => {
                    tracing::warn!(username = %p.username, "player without a color left out of the deal");
                    None
                }
            })
            .collect();

        let mut deck = Deck::new_shuffled();
        for _ in 0..settings.max_hand_size {
            for seat in &mut seats {
                if let Some(card) = deck.draw() {
                    seat.hand.push(card);
                }
            }
        }

        tracing::debug!(seats = seats.len(), left = deck.len(), "opening hands dealt");
        Table {
            seats,
            deck,
            current: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sequence_protocol::LobbyCode;

    fn player(name: &str, color: Option<Color>) -> PlayerSnapshot {
        let mut p = PlayerSnapshot::new(
            LobbyCode::parse("ABCD").unwrap(),
            Username::new(name).unwrap(),
        );
        p.color = color;
        p.ready = true;
        p
    }

    #[test]
    fn test_deck_has_two_of_every_card() {
        let mut deck = Deck::new_shuffled();
        assert_eq!(deck.len(), 104);

        let mut aces_of_spades = 0;
        while let Some(card) = deck.draw() {
            if card == (Card { rank: Rank::Ace, suit: Suit::Spades }) {
                aces_of_spades += 1;
            }
        }
        assert_eq!(aces_of_spades, 2);
        assert!(deck.is_empty());
    }

    #[test]
    fn test_empty_deck_refills_from_discard() {
        let mut deck = Deck::new_shuffled();
        while deck.draw().is_some() {}
        let card = Card {
            rank: Rank::Jack,
            suit: Suit::Hearts,
        };
        deck.discard(card);
        assert_eq!(deck.draw(), Some(card));
        assert_eq!(deck.draw(), None);
    }

    #[test]
    fn test_start_deals_hands_in_roster_order() {
        let settings = Settings {
            num_of_players: 2,
            max_hand_size: 7,
        };
        let table = OpeningTable::start(
            &settings,
            &[
                player("alice", Some(Color::Red)),
                player("bob", Some(Color::Green)),
            ],
        );

        assert_eq!(table.seats().len(), 2);
        assert_eq!(table.seats()[0].username.as_str(), "alice");
        assert_eq!(table.seats()[1].color, Color::Green);
        assert!(table.seats().iter().all(|s| s.hand.len() == 7));
        assert_eq!(table.deck().len(), 104 - 14);
        assert_eq!(table.current_seat().map(|s| s.username.as_str()), Some("alice"));
    }

    #[test]
    fn test_start_skips_players_without_color() {
        let table = OpeningTable::start(
            &Settings::default(),
            &[player("alice", Some(Color::Blue)), player("bob", None)],
        );
        assert_eq!(table.seats().len(), 1);
    }
}
