//! Bidirectional symbol tables between device short codes and domain names.
//!
//! Every enumerated protocol field (prompts, alarms, errors, directions, units,
//! trigger edges and setups, phase functions) is translated here and nowhere
//! else. Each entry holds a device code and one or more names; the first name
//! is canonical and is what [`SymbolTable::decode`] returns.

use pump_core::{PumpError, PumpResult};

/// One code with its canonical name and aliases.
#[derive(Debug, PartialEq, Eq)]
pub struct Symbol {
    pub code: &'static str,
    /// `names[0]` is canonical. Never empty.
    pub names: &'static [&'static str],
}

impl Symbol {
    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn name(&self) -> &'static str {
        self.names[0]
    }

    pub fn matches(&self, name: &str) -> bool {
        self.names.contains(&name)
    }
}

/// Immutable code table for one protocol field.
#[derive(Debug)]
pub struct SymbolTable {
    kind: &'static str,
    entries: &'static [Symbol],
}

impl SymbolTable {
    pub const fn new(kind: &'static str, entries: &'static [Symbol]) -> Self {
        Self { kind, entries }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn entries(&self) -> &'static [Symbol] {
        self.entries
    }

    /// Resolve a name or alias to its device code.
    ///
    /// Fails with `UnknownSymbol` unless exactly one entry carries the name.
    pub fn encode(&self, name: &str) -> PumpResult<&'static str> {
        let mut hits = self.entries.iter().filter(|s| s.matches(name));
        match (hits.next(), hits.next()) {
            (Some(symbol), None) => Ok(symbol.code),
            _ => Err(PumpError::UnknownSymbol {
                table: self.kind,
                name: name.to_string(),
            }),
        }
    }

    /// Resolve a device code to its canonical name.
    pub fn decode(&self, code: &str) -> PumpResult<&'static str> {
        self.lookup(code).map(Symbol::name)
    }

    /// Resolve a device code to its table entry.
    pub fn lookup(&self, code: &str) -> PumpResult<&'static Symbol> {
        self.entries
            .iter()
            .find(|s| s.code == code)
            .ok_or_else(|| PumpError::UnknownCode {
                table: self.kind,
                code: code.to_string(),
            })
    }

    /// Map any alias onto the canonical name of its entry.
    pub fn canonical(&self, name: &str) -> PumpResult<&'static str> {
        let code = self.encode(name)?;
        self.decode(code)
    }
}

macro_rules! symbols {
    ($($code:literal => [$($name:literal),+ $(,)?]),* $(,)?) => {
        &[$(Symbol { code: $code, names: &[$($name),+] }),*]
    };
}

/// Operating state letter returned with every response.
pub static PROMPT: SymbolTable = SymbolTable::new(
    "prompt",
    symbols! {
        "I" => ["infusing"],
        "W" => ["withdrawing"],
        "S" => ["stopped", "pumping program stopped"],
        "P" => ["paused", "pumping program paused"],
        "T" => ["pause phase"],
        "U" => ["user wait", "operational trigger wait"],
    },
);

pub static ALARM: SymbolTable = SymbolTable::new(
    "alarm",
    symbols! {
        "R" => ["pump was reset (power was interrupted)", "reset"],
        "S" => ["pump motor stalled", "stalled"],
        "T" => ["safe mode communications time out", "safe mode timeout"],
        "E" => ["pumping program error", "program error"],
        "O" => ["pumping program phase is out of range", "phase out of range"],
    },
);

/// Error tokens following `?` in the data field. Names match
/// [`pump_core::DeviceErrorKind::name`].
pub static ERROR: SymbolTable = SymbolTable::new(
    "error",
    symbols! {
        "" => ["command not recognized"],
        "NA" => ["command not available"],
        "OOR" => ["data out of range"],
        "COM" => ["invalid communications packet"],
        "IGN" => ["command ignored"],
    },
);

pub static DIRECTION: SymbolTable = SymbolTable::new(
    "direction",
    symbols! {
        "INF" => ["infuse", "infusion"],
        "WDR" => ["withdraw", "withdrawal"],
        "REV" => ["reverse"],
    },
);

pub static VOLUME_UNIT: SymbolTable = SymbolTable::new(
    "volume unit",
    symbols! {
        "U" => ["\u{3bc}l", "ul", "microliter"],
        "M" => ["ml", "mL", "milliliter", "cc"],
    },
);

pub static TIME_UNIT: SymbolTable = SymbolTable::new(
    "time unit",
    symbols! {
        "M" => ["min", "mn", "minute"],
        "H" => ["h", "hr", "hour"],
    },
);

/// Edge and level primitives used to describe trigger start/stop conditions.
pub static TRIGGER_EDGE: SymbolTable = SymbolTable::new(
    "trigger edge",
    symbols! {
        "F" => ["falling", "falling edge", "fall"],
        "R" => ["rising", "rising edge", "rise"],
        "L" => ["low", "low level"],
        "H" => ["high", "high level"],
    },
);

/// Two-letter trigger setup codes accepted by `TRG`.
pub static TRIGGER_SETUP: SymbolTable = SymbolTable::new(
    "trigger setup",
    symbols! {
        "FT" => ["foot switch", "foot"],
        "FH" => ["foot switch hold", "hold"],
        "LE" => ["level control", "level"],
        "T2" => ["rising toggle", "toggle"],
        "ST" => ["start only", "start"],
        "St" => ["start on rising"],
        "SF" => ["stop only", "stop"],
        "SR" => ["stop on rising"],
        "LO" => ["run while low"],
        "HI" => ["run while high"],
        "SL" => ["start on low"],
        "SH" => ["start on high"],
        "OF" => ["trigger off", "off"],
    },
);

pub static PHASE_FUNCTION: SymbolTable = SymbolTable::new(
    "phase function",
    symbols! {
        "RAT" => ["rate"],
        "INC" => ["increment"],
        "DEC" => ["decrement"],
        "STP" => ["stop"],
        "JMP" => ["jump"],
        "LOP" => ["loop for", "loop to"],
        "LPS" => ["loop start"],
        "LPE" => ["loop end"],
        "PAS" => ["pause"],
        "IF" => ["if"],
        "EVN" => ["event trap"],
        "EVR" => ["event reset"],
        "BEP" => ["beep"],
        "OUT" => ["output"],
    },
);

/// Trigger setup codes keyed by a `(start, stop)` edge pattern.
///
/// Each name is two characters: the start edge letter then the stop edge
/// letter from [`TRIGGER_EDGE`], with `_` for "unspecified".
pub static TRIGGER_START_STOP: SymbolTable = SymbolTable::new(
    "trigger start/stop",
    symbols! {
        "FT" => ["FF"],
        "FH" => ["FR"],
        "LE" => ["RF"],
        "T2" => ["RR"],
        "ST" => ["F_"],
        "St" => ["R_"],
        "SF" => ["_F"],
        "SR" => ["_R"],
        "LO" => ["LH"],
        "HI" => ["HL"],
        "SL" => ["L_"],
        "SH" => ["H_"],
        "OF" => ["__"],
    },
);

/// Every table, for completeness checks.
pub static ALL_TABLES: [&SymbolTable; 10] = [
    &PROMPT,
    &ALARM,
    &ERROR,
    &DIRECTION,
    &VOLUME_UNIT,
    &TIME_UNIT,
    &TRIGGER_EDGE,
    &TRIGGER_SETUP,
    &PHASE_FUNCTION,
    &TRIGGER_START_STOP,
];
