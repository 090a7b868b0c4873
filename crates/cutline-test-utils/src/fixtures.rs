//! Reference local-state implementations.

use cutline_core::{GlobalSnapshot, LocalState, ProcessId};

/// An account that moves money between processes.
///
/// A send debits the amount, a delivery credits it. The sum of all
/// balances plus all in-flight amounts is invariant, which makes this
/// the standard consistency check for a cut.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bank {
    balance: i64,
}

impl Bank {
    pub fn new(balance: i64) -> Self {
        Self { balance }
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }
}

impl LocalState for Bank {
    type Payload = i64;
    type Snapshot = i64;

    fn on_deliver(&mut self, _from: ProcessId, amount: &i64) {
        self.balance += amount;
    }

    fn on_send(&mut self, _to: ProcessId, amount: &i64) {
        self.balance -= amount;
    }

    fn capture(&self) -> i64 {
        self.balance
    }
}

/// Balances plus in-flight transfers.
pub fn total_money(snapshot: &GlobalSnapshot<i64, i64>) -> i64 {
    let held: i64 = snapshot.states().map(|(_, b)| *b).sum();
    let moving: i64 = snapshot
        .channels()
        .flat_map(|(_, log)| log.iter())
        .sum();
    held + moving
}

/// Keeps every greeting it received, in delivery order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Chatter {
    heard: Vec<String>,
}

impl Chatter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heard(&self) -> &[String] {
        &self.heard
    }
}

impl LocalState for Chatter {
    type Payload = String;
    type Snapshot = Vec<String>;

    fn on_deliver(&mut self, from: ProcessId, greeting: &String) {
        self.heard.push(format!("{from}: {greeting}"));
    }

    fn capture(&self) -> Vec<String> {
        self.heard.clone()
    }
}
