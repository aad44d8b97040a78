//! Dimensional units engine.
//!
//! Unit expressions such as `m/s`, `kg m^-3`, `hPa`, `km/h` or `degC` are parsed into a
//! scale and offset relative to the SI base units plus a dimension vector. Two units can
//! be converted between each other only when their dimensions agree; anything else is a
//! [`ArchiveError::Unit`] and never a silently wrong magnitude.
//!
//! Angles are treated as dimensionless (radian = 1), so `deg` converts to `rad` but
//! also to a plain ratio.

use std::collections::HashMap;
use std::fmt;

use ndarray::Array2;

use crate::error::{ArchiveError, ArchiveResult};

const BASE_SYMBOLS: [&str; 7] = ["m", "kg", "s", "A", "K", "mol", "cd"];

/// Exponents of the seven SI base quantities (length, mass, time, current,
/// temperature, amount, luminous intensity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dimension([i8; 7]);

impl Dimension {
    /// The dimension of pure numbers.
    pub const NONE: Dimension = Dimension([0; 7]);

    fn combine(self, other: Dimension, sign: i8) -> Dimension {
        let mut exps = self.0;
        for (e, o) in exps.iter_mut().zip(other.0) {
            *e += sign * o;
        }
        Dimension(exps)
    }

    fn powi(self, n: i32) -> Dimension {
        let mut exps = self.0;
        for e in exps.iter_mut() {
            *e = (*e as i32 * n) as i8;
        }
        Dimension(exps)
    }

    /// True for ratios, counts and angles.
    pub fn is_dimensionless(&self) -> bool {
        self.0.iter().all(|e| *e == 0)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_dimensionless() {
            return write!(f, "dimensionless");
        }
        let parts: Vec<String> = BASE_SYMBOLS
            .iter()
            .zip(self.0)
            .filter(|(_, e)| *e != 0)
            .map(|(sym, e)| if e == 1 { sym.to_string() } else { format!("{sym}^{e}") })
            .collect();
        write!(f, "{}", parts.join(" "))
    }
}

const LENGTH: Dimension = Dimension([1, 0, 0, 0, 0, 0, 0]);
const MASS: Dimension = Dimension([0, 1, 0, 0, 0, 0, 0]);
const TIME: Dimension = Dimension([0, 0, 1, 0, 0, 0, 0]);
const CURRENT: Dimension = Dimension([0, 0, 0, 1, 0, 0, 0]);
const TEMPERATURE: Dimension = Dimension([0, 0, 0, 0, 1, 0, 0]);
const AMOUNT: Dimension = Dimension([0, 0, 0, 0, 0, 1, 0]);
const LUMINOUS: Dimension = Dimension([0, 0, 0, 0, 0, 0, 1]);

/// A parsed unit: `si = value * scale + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Unit {
    scale: f64,
    offset: f64,
    dimension: Dimension,
}

impl Unit {
    const ONE: Unit = Unit::linear(1.0, Dimension::NONE);

    const fn linear(scale: f64, dimension: Dimension) -> Self {
        Self {
            scale,
            offset: 0.0,
            dimension,
        }
    }

    /// Multiplier to the coherent SI unit.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Additive offset to the SI unit (non-zero only for `degC`, `degF`).
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Dimension vector.
    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    fn is_offset(&self) -> bool {
        self.offset != 0.0
    }

    fn mul(self, other: Unit) -> Unit {
        Unit::linear(self.scale * other.scale, self.dimension.combine(other.dimension, 1))
    }

    fn div(self, other: Unit) -> Unit {
        Unit::linear(self.scale / other.scale, self.dimension.combine(other.dimension, -1))
    }

    fn powi(self, n: i32) -> Unit {
        Unit::linear(self.scale.powi(n), self.dimension.powi(n))
    }

    fn to_si(&self, value: f64) -> f64 {
        value * self.scale + self.offset
    }

    fn from_si(&self, value: f64) -> f64 {
        (value - self.offset) / self.scale
    }
}

#[derive(Debug, Clone, Copy)]
struct UnitDef {
    unit: Unit,
    prefixable: bool,
}

const PREFIXES: [(&str, f64); 23] = [
    ("da", 1e1),
    ("Y", 1e24),
    ("Z", 1e21),
    ("E", 1e18),
    ("P", 1e15),
    ("T", 1e12),
    ("G", 1e9),
    ("M", 1e6),
    ("k", 1e3),
    ("h", 1e2),
    ("d", 1e-1),
    ("c", 1e-2),
    ("m", 1e-3),
    ("u", 1e-6),
    ("µ", 1e-6),
    ("μ", 1e-6),
    ("n", 1e-9),
    ("p", 1e-12),
    ("f", 1e-15),
    ("a", 1e-18),
    ("z", 1e-21),
    ("y", 1e-24),
    ("R", 1e27),
];

/// A conversion resolved between two unit expressions.
#[derive(Debug, Clone, Copy)]
pub struct Conversion {
    from: Unit,
    to: Unit,
    identity: bool,
}

impl Conversion {
    /// Converts a single magnitude.
    pub fn apply(&self, value: f64) -> f64 {
        if self.identity {
            value
        } else {
            self.to.from_si(self.from.to_si(value))
        }
    }

    /// True when source and target are the same expression.
    pub fn is_identity(&self) -> bool {
        self.identity
    }
}

/// Registry of unit symbols and the parser over them.
#[derive(Debug, Clone)]
pub struct UnitSystem {
    units: HashMap<String, UnitDef>,
}

impl Default for UnitSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitSystem {
    /// Creates a unit system with the SI base and derived units plus the
    /// atmospheric and aviation units used in flight data.
    pub fn new() -> Self {
        let mut system = Self {
            units: HashMap::new(),
        };
        let pa = MASS.combine(LENGTH, -1).combine(TIME.powi(2), -1);
        let newton = MASS.combine(LENGTH, 1).combine(TIME.powi(2), -1);
        let joule = newton.combine(LENGTH, 1);
        let watt = joule.combine(TIME, -1);
        let volt = watt.combine(CURRENT, -1);
        let velocity = LENGTH.combine(TIME, -1);
        let volume = LENGTH.powi(3);
        let deg = std::f64::consts::PI / 180.0;

        let prefixable: [(&str, f64, Dimension); 14] = [
            ("m", 1.0, LENGTH),
            ("g", 1e-3, MASS),
            ("s", 1.0, TIME),
            ("A", 1.0, CURRENT),
            ("K", 1.0, TEMPERATURE),
            ("mol", 1.0, AMOUNT),
            ("Hz", 1.0, TIME.powi(-1)),
            ("N", 1.0, newton),
            ("Pa", 1.0, pa),
            ("J", 1.0, joule),
            ("W", 1.0, watt),
            ("V", 1.0, volt),
            ("L", 1e-3, volume),
            ("bar", 1e5, pa),
        ];
        for (name, scale, dim) in prefixable {
            system.insert(name, Unit::linear(scale, dim), true);
        }
        system.insert("l", Unit::linear(1e-3, volume), true);
        system.insert("C", Unit::linear(1.0, CURRENT.combine(TIME, 1)), true);

        let plain: [(&[&str], f64, Dimension); 27] = [
            (&["cd", "candela"], 1.0, LUMINOUS),
            (&["meter", "metre", "meters", "metres"], 1.0, LENGTH),
            (&["ft", "foot", "feet"], 0.3048, LENGTH),
            (&["in", "inch", "inches"], 0.0254, LENGTH),
            (&["yd", "yard"], 0.9144, LENGTH),
            (&["mi", "mile", "miles"], 1609.344, LENGTH),
            (&["nmi", "nautical_mile"], 1852.0, LENGTH),
            (&["micron"], 1e-6, LENGTH),
            (&["t", "tonne"], 1e3, MASS),
            (&["lb", "pound"], 0.453_592_37, MASS),
            (&["sec", "second", "seconds"], 1.0, TIME),
            (&["min", "minute", "minutes"], 60.0, TIME),
            (&["h", "hr", "hour", "hours"], 3600.0, TIME),
            (&["day", "days"], 86400.0, TIME),
            (&["kelvin"], 1.0, TEMPERATURE),
            (&["atm", "atmosphere"], 101_325.0, pa),
            (&["mmHg"], 133.322_387_415, pa),
            (&["Torr", "torr"], 101_325.0 / 760.0, pa),
            (&["inHg"], 3386.389, pa),
            (&["psi"], 6894.757_293_168, pa),
            (&["knot", "knots", "kt", "kn"], 1852.0 / 3600.0, velocity),
            (&["mph"], 0.447_04, velocity),
            (&["cc"], 1e-6, volume),
            (&["rad", "radian", "radians"], 1.0, Dimension::NONE),
            (&["deg", "degree", "degrees", "°"], deg, Dimension::NONE),
            (&["percent", "%"], 1e-2, Dimension::NONE),
            (
                &["count", "counts", "dimensionless", "ratio", "unitless"],
                1.0,
                Dimension::NONE,
            ),
        ];
        for (names, scale, dim) in plain {
            for name in names {
                system.insert(name, Unit::linear(scale, dim), false);
            }
        }
        system.insert("arcmin", Unit::linear(deg / 60.0, Dimension::NONE), false);
        system.insert("arcsec", Unit::linear(deg / 3600.0, Dimension::NONE), false);
        system.insert("ppm", Unit::linear(1e-6, Dimension::NONE), false);
        system.insert("ppb", Unit::linear(1e-9, Dimension::NONE), false);

        let celsius = Unit {
            scale: 1.0,
            offset: 273.15,
            dimension: TEMPERATURE,
        };
        let fahrenheit = Unit {
            scale: 5.0 / 9.0,
            offset: 273.15 - 32.0 * 5.0 / 9.0,
            dimension: TEMPERATURE,
        };
        for name in ["degC", "celsius", "°C"] {
            system.insert(name, celsius, false);
        }
        for name in ["degF", "fahrenheit", "°F"] {
            system.insert(name, fahrenheit, false);
        }
        system
    }

    fn insert(&mut self, name: &str, unit: Unit, prefixable: bool) {
        self.units
            .insert(name.to_string(), UnitDef { unit, prefixable });
    }

    /// Adds a named unit defined by an expression over existing units,
    /// e.g. `define("kts", "knot")` or `define("hft", "100 ft")`.
    pub fn define(&mut self, name: &str, expression: &str) -> ArchiveResult<()> {
        if name.is_empty() || !name.chars().all(is_ident_char) {
            return Err(ArchiveError::Unit(format!(
                "'{name}' is not a valid unit name"
            )));
        }
        let unit = self.parse(expression)?;
        self.insert(name, unit, false);
        Ok(())
    }

    /// True when the expression parses.
    pub fn is_known(&self, expression: &str) -> bool {
        self.parse(expression).is_ok()
    }

    /// Parses a unit expression.
    pub fn parse(&self, expression: &str) -> ArchiveResult<Unit> {
        let tokens = lex(expression)?;
        if tokens.is_empty() {
            return Ok(Unit::ONE);
        }
        let mut parser = Parser {
            system: self,
            tokens: &tokens,
            pos: 0,
            source: expression,
        };
        let unit = parser.expression()?;
        if parser.pos != tokens.len() {
            return Err(ArchiveError::Unit(format!(
                "unexpected trailing input in unit '{expression}'"
            )));
        }
        Ok(unit)
    }

    /// Resolves the conversion between two expressions, failing on
    /// dimensionally incompatible units.
    pub fn converter(&self, from: &str, to: &str) -> ArchiveResult<Conversion> {
        let from_unit = self.parse(from)?;
        let to_unit = self.parse(to)?;
        if from_unit.dimension != to_unit.dimension {
            return Err(ArchiveError::Unit(format!(
                "cannot convert from '{from}' ({}) to '{to}' ({})",
                from_unit.dimension, to_unit.dimension
            )));
        }
        Ok(Conversion {
            from: from_unit,
            to: to_unit,
            identity: from.trim() == to.trim(),
        })
    }

    /// Converts a single value.
    pub fn convert(&self, value: f64, from: &str, to: &str) -> ArchiveResult<f64> {
        Ok(self.converter(from, to)?.apply(value))
    }

    /// Converts every value of a slice.
    pub fn convert_slice(&self, values: &[f64], from: &str, to: &str) -> ArchiveResult<Vec<f64>> {
        let conversion = self.converter(from, to)?;
        Ok(values.iter().map(|v| conversion.apply(*v)).collect())
    }

    /// Converts every element of a column array.
    pub fn convert_array(
        &self,
        values: Array2<f64>,
        from: &str,
        to: &str,
    ) -> ArchiveResult<Array2<f64>> {
        let conversion = self.converter(from, to)?;
        if conversion.is_identity() {
            return Ok(values);
        }
        Ok(values.mapv_into(|v| conversion.apply(v)))
    }

    fn resolve(&self, ident: &str) -> Option<Unit> {
        if let Some(def) = self.units.get(ident) {
            return Some(def.unit);
        }
        PREFIXES.iter().find_map(|(prefix, factor)| {
            let rest = ident.strip_prefix(prefix)?;
            let def = self.units.get(rest)?;
            def.prefixable.then(|| Unit::linear(def.unit.scale * factor, def.unit.dimension))
        })
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '%' || c == '°'
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String, Option<i32>),
    Star,
    Slash,
    Caret,
    Minus,
    Plus,
    LParen,
    RParen,
}

fn lex(expression: &str) -> ArchiveResult<Vec<Token>> {
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Caret);
                i += 2;
            }
            '*' | '·' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '^' => {
                tokens.push(Token::Caret);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '-' || chars[j] == '+') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text.parse::<f64>().map_err(|_| {
                    ArchiveError::Unit(format!("invalid number '{text}' in unit '{expression}'"))
                })?;
                tokens.push(Token::Number(value));
            }
            c if is_ident_char(c) || c == 'µ' || c == 'μ' => {
                let start = i;
                while i < chars.len()
                    && (is_ident_char(chars[i]) || chars[i] == 'µ' || chars[i] == 'μ')
                {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                // Trailing integer directly attached to a symbol is an exponent: m3, s-1.
                let mut exponent = None;
                let signed = chars.get(i) == Some(&'-')
                    && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit());
                if signed || chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
                    let exp_start = i;
                    if signed {
                        i += 1;
                    }
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                    let text: String = chars[exp_start..i].iter().collect();
                    exponent = text.parse::<i32>().ok();
                }
                tokens.push(Token::Ident(name, exponent));
            }
            other => {
                return Err(ArchiveError::Unit(format!(
                    "unexpected character '{other}' in unit '{expression}'"
                )))
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    system: &'a UnitSystem,
    tokens: &'a [Token],
    pos: usize,
    source: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn error(&self, msg: &str) -> ArchiveError {
        ArchiveError::Unit(format!("{msg} in unit '{}'", self.source))
    }

    fn expression(&mut self) -> ArchiveResult<Unit> {
        let mut acc = self.term()?;
        loop {
            let divide = match self.peek() {
                Some(Token::Star) => {
                    self.pos += 1;
                    false
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    true
                }
                Some(Token::Number(_)) | Some(Token::Ident(..)) | Some(Token::LParen) => false,
                _ => break,
            };
            let rhs = self.term()?;
            if acc.is_offset() || rhs.is_offset() {
                return Err(self.error("offset units cannot be combined"));
            }
            acc = if divide { acc.div(rhs) } else { acc.mul(rhs) };
        }
        Ok(acc)
    }

    fn term(&mut self) -> ArchiveResult<Unit> {
        let base = self.factor()?;
        if self.peek() == Some(&Token::Caret) {
            self.pos += 1;
            let negative = match self.peek() {
                Some(Token::Minus) => {
                    self.pos += 1;
                    true
                }
                Some(Token::Plus) => {
                    self.pos += 1;
                    false
                }
                _ => false,
            };
            let exponent = match self.peek() {
                Some(Token::Number(n)) if n.fract() == 0.0 => *n as i32,
                _ => return Err(self.error("expected integer exponent")),
            };
            self.pos += 1;
            let exponent = if negative { -exponent } else { exponent };
            return self.raise(base, exponent);
        }
        Ok(base)
    }

    fn raise(&self, base: Unit, exponent: i32) -> ArchiveResult<Unit> {
        if exponent == 1 {
            return Ok(base);
        }
        if base.is_offset() {
            return Err(self.error("offset units cannot be raised to a power"));
        }
        Ok(base.powi(exponent))
    }

    fn factor(&mut self) -> ArchiveResult<Unit> {
        let token = self
            .peek()
            .cloned()
            .ok_or_else(|| self.error("unexpected end"))?;
        self.pos += 1;
        match token {
            Token::Number(n) => Ok(Unit::linear(n, Dimension::NONE)),
            Token::Ident(name, exponent) => {
                let unit = self
                    .system
                    .resolve(&name)
                    .ok_or_else(|| self.error(&format!("unknown unit '{name}'")))?;
                match exponent {
                    Some(e) => self.raise(unit, e),
                    None => Ok(unit),
                }
            }
            Token::LParen => {
                let inner = self.expression()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(self.error("missing ')'"));
                }
                self.pos += 1;
                Ok(inner)
            }
            _ => Err(self.error("unexpected operator")),
        }
    }
}
