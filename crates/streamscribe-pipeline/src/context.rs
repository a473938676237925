//! Context biasing graph
//!
//! User phrases are compiled into a trie with failure links over token-id
//! sequences. Each matched token earns `context_score`; a partial match
//! that falls off the trie pays its accumulated bonus back, so only
//! completed phrases (and live partial matches) influence the beam.
//!
//! States are indices into a flat arena; the root (empty context) is
//! state 0.

use std::collections::{HashMap, VecDeque};

use streamscribe_config::ContextConfig;
use streamscribe_core::Result;

use crate::symbol::SymbolTable;

#[derive(Debug, Clone, Default)]
struct ContextState {
    children: HashMap<i32, usize>,
    fail: usize,
    /// Bonus accumulated along the path from the root.
    bonus: f32,
    /// At least one phrase ends here.
    terminal: bool,
}

/// Weighted prefix automaton over biasing phrases.
#[derive(Debug, Clone)]
pub struct ContextGraph {
    states: Vec<ContextState>,
}

impl ContextGraph {
    /// Compile phrases into the automaton, tokenizing them against the
    /// decoder's symbol table. An unknown token span is fatal.
    pub fn build(
        phrases: &[String],
        symbols: &SymbolTable,
        config: &ContextConfig,
    ) -> Result<Self> {
        let mut graph = Self {
            states: vec![ContextState::default()],
        };
        for phrase in phrases {
            let ids = symbols.tokenize(phrase)?;
            graph.insert(&ids, config.context_score);
        }
        graph.link_failures();
        tracing::debug!(
            phrases = phrases.len(),
            states = graph.states.len(),
            "compiled context graph"
        );
        Ok(graph)
    }

    /// The empty-context state.
    pub fn root(&self) -> usize {
        0
    }

    fn insert(&mut self, ids: &[i32], score_per_token: f32) {
        let mut current = 0;
        for &id in ids {
            current = match self.states[current].children.get(&id) {
                Some(&next) => next,
                None => {
                    let bonus = self.states[current].bonus + score_per_token;
                    self.states.push(ContextState {
                        bonus,
                        ..ContextState::default()
                    });
                    let next = self.states.len() - 1;
                    self.states[current].children.insert(id, next);
                    next
                }
            };
        }
        self.states[current].terminal = true;
    }

    /// Aho-Corasick failure links, breadth-first from the root.
    fn link_failures(&mut self) {
        let mut queue: VecDeque<usize> = VecDeque::new();
        let root_children: Vec<usize> = self.states[0].children.values().copied().collect();
        for child in root_children {
            self.states[child].fail = 0;
            queue.push_back(child);
        }

        while let Some(state) = queue.pop_front() {
            let children: Vec<(i32, usize)> = self.states[state]
                .children
                .iter()
                .map(|(&token, &child)| (token, child))
                .collect();
            for (token, child) in children {
                let mut fail = self.states[state].fail;
                loop {
                    if let Some(&next) = self.states[fail].children.get(&token) {
                        if next != child {
                            self.states[child].fail = next;
                        }
                        break;
                    }
                    if fail == 0 {
                        self.states[child].fail = 0;
                        break;
                    }
                    fail = self.states[fail].fail;
                }
                queue.push_back(child);
            }
        }
    }

    /// Advance the automaton by one emitted token.
    ///
    /// Returns the next state and the score delta to apply to the
    /// hypothesis. Completing a phrase banks its bonus and restarts
    /// matching at the root; missing everywhere pays the partial bonus
    /// back.
    pub fn step(&self, state: usize, token: i32) -> (usize, f32) {
        if let Some(&next) = self.states[state].children.get(&token) {
            let delta = self.states[next].bonus - self.states[state].bonus;
            if self.states[next].terminal && self.states[next].children.is_empty() {
                return (0, delta);
            }
            return (next, delta);
        }

        let mut fail = self.states[state].fail;
        loop {
            if let Some(&next) = self.states[fail].children.get(&token) {
                let delta = self.states[next].bonus - self.states[state].bonus;
                if self.states[next].terminal && self.states[next].children.is_empty() {
                    // the suffix completes a (shorter) phrase
                    return (0, delta);
                }
                return (next, delta);
            }
            if fail == 0 {
                break;
            }
            fail = self.states[fail].fail;
        }

        (0, -self.states[state].bonus)
    }
}
