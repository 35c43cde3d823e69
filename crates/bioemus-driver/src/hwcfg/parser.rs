//! Hardware configuration file parser
//!
//! Line-oriented text, consumed strictly in order:
//!
//! ```text
//! #SW_VERSION=...                       header, 2 lines
//! #DATE=...
//! HHparam_N0=gNa,gKd,...,gsyn_mul       N lines, 16 fields
//! psyn=k1,k2,...                        1 line, 18 fields
//! ionrates_I0A0=m1;m2;h1;h2             tables × depth lines
//! synrates_A0=bv;tv;sn                  depth lines
//! N0=ampa$0.1,x$0,...                   N lines of N type$weight tokens
//! ```
//!
//! Keys are not used for lookup, but `HHparam_N{k}`, `psyn` and `N{k}` must
//! name the line they sit on. Line `k` of the matrix lists the inputs of
//! destination neuron `k`, token `j` being source neuron `j`.

use crate::error::{BioemusError, Result};
use bioemus_hw::params::{HhParam, SynapseType, IONRATE_FIELDS, PSYN_COUNT, SYNRATE_FIELDS};
use bioemus_hw::HwGeometry;
use std::path::Path;

/// Header lines at the top of the file.
pub const HEADER_LINES: usize = 2;

const KEY_SEP: char = '=';
const VAL_SEP: char = ',';
const COL_SEP: char = ';';
const SYN_SEP: char = '$';

/// One synapse of the connectivity matrix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Synapse {
    /// Receptor type.
    pub kind: SynapseType,
    /// Weight in Q(2.12) range.
    pub weight: f32,
}

/// Dense N×N connectivity matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct SynapseMatrix {
    neurons: u32,
    entries: Vec<Synapse>,
}

impl SynapseMatrix {
    /// Neuron count.
    #[must_use]
    pub const fn neurons(&self) -> u32 {
        self.neurons
    }

    /// Synapse from `src` onto `dest`.
    #[must_use]
    pub fn get(&self, src: u32, dest: u32) -> Synapse {
        self.entries[dest as usize * self.neurons as usize + src as usize]
    }

    /// All synapses as `(src, dest, synapse)`.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32, Synapse)> + '_ {
        let n = self.neurons as usize;
        self.entries.iter().enumerate().map(move |(i, s)| {
            #[allow(clippy::cast_possible_truncation)]
            let (src, dest) = ((i % n) as u32, (i / n) as u32);
            (src, dest, *s)
        })
    }
}

/// Parsed hardware configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct HwConfig {
    /// Header lines, verbatim.
    pub header: Vec<String>,
    /// HH parameter vector per neuron.
    pub hh_params: Vec<[f32; HhParam::COUNT]>,
    /// Synapse-type parameter vector.
    pub psyn: [f32; PSYN_COUNT],
    /// Ion-rate tables, `[table][address]`.
    pub ionrates: Vec<Vec<[f32; IONRATE_FIELDS]>>,
    /// Synapse-rate table rows.
    pub synrates: Vec<[f32; SYNRATE_FIELDS]>,
    /// Connectivity matrix.
    pub synapses: SynapseMatrix,
}

impl HwConfig {
    /// Read and parse a configuration file.
    ///
    /// # Errors
    ///
    /// I/O errors, or [`BioemusError::Config`] naming the offending line.
    pub fn load(path: impl AsRef<Path>, geometry: &HwGeometry) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Read hardware configuration file: {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, geometry)
    }

    /// Parse configuration text for `geometry`.
    ///
    /// # Errors
    ///
    /// [`BioemusError::Config`] for missing lines, wrong field counts,
    /// unparsable numbers or trailing content.
    pub fn parse(text: &str, geometry: &HwGeometry) -> Result<Self> {
        let mut lines = Lines::new(text);
        let n = geometry.neurons as usize;

        let mut header = Vec::with_capacity(HEADER_LINES);
        for _ in 0..HEADER_LINES {
            let (_, line) = lines.next_line("header")?;
            header.push(line.trim_end().to_string());
        }

        let mut hh_params = Vec::with_capacity(n);
        for nrn in 0..n {
            let (no, value) =
                lines.next_keyed(&format!("HHparam_N{nrn}"), &format!("HH parameters of neuron {nrn}"))?;
            hh_params.push(parse_floats::<{ HhParam::COUNT }>(no, value, VAL_SEP)?);
        }

        let (no, value) = lines.next_keyed("psyn", "synapse parameters")?;
        let psyn = parse_floats::<PSYN_COUNT>(no, value, VAL_SEP)?;

        let depth = geometry.ionrate_depth as usize;
        let mut ionrates = Vec::with_capacity(geometry.ionrate_count as usize);
        for table in 0..geometry.ionrate_count {
            let mut rows = Vec::with_capacity(depth);
            for addr in 0..depth {
                let (no, _, value) = lines.next_record(&format!("ion rate {table}/{addr}"))?;
                rows.push(parse_floats::<IONRATE_FIELDS>(no, value, COL_SEP)?);
            }
            ionrates.push(rows);
        }

        let mut synrates = Vec::with_capacity(geometry.synrate_depth as usize);
        for addr in 0..geometry.synrate_depth {
            let (no, _, value) = lines.next_record(&format!("synapse rate {addr}"))?;
            synrates.push(parse_floats::<SYNRATE_FIELDS>(no, value, COL_SEP)?);
        }

        let mut entries = Vec::with_capacity(n * n);
        for dest in 0..n {
            let (no, value) =
                lines.next_keyed(&format!("N{dest}"), &format!("synapses of neuron {dest}"))?;
            let before = entries.len();
            for token in value.split(VAL_SEP) {
                entries.push(parse_synapse(no, token)?);
            }
            let found = entries.len() - before;
            if found != n {
                return Err(BioemusError::config(
                    no,
                    format!("expected {n} synapses, found {found}"),
                ));
            }
        }

        lines.expect_end()?;
        tracing::debug!(
            "Parsed configuration: {n} neurons, {} ion tables, {} synapse rates",
            ionrates.len(),
            synrates.len()
        );

        Ok(Self {
            header,
            hh_params,
            psyn,
            ionrates,
            synrates,
            synapses: SynapseMatrix {
                neurons: geometry.neurons,
                entries,
            },
        })
    }
}

struct Lines<'a> {
    inner: std::iter::Enumerate<std::str::Lines<'a>>,
    last: usize,
}

impl<'a> Lines<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            inner: text.lines().enumerate(),
            last: 0,
        }
    }

    fn next_line(&mut self, what: &str) -> Result<(usize, &'a str)> {
        match self.inner.next() {
            Some((i, line)) => {
                self.last = i + 1;
                Ok((i + 1, line))
            }
            None => Err(BioemusError::config(
                self.last + 1,
                format!("unexpected end of file, expected {what}"),
            )),
        }
    }

    fn next_record(&mut self, what: &str) -> Result<(usize, &'a str, &'a str)> {
        let (no, line) = self.next_line(what)?;
        match line.split_once(KEY_SEP) {
            Some((key, value)) => Ok((no, key.trim(), value.trim_end())),
            None => Err(BioemusError::config(
                no,
                format!("missing '{KEY_SEP}' in {what}"),
            )),
        }
    }

    fn next_keyed(&mut self, key: &str, what: &str) -> Result<(usize, &'a str)> {
        let (no, found, value) = self.next_record(what)?;
        if found != key {
            return Err(BioemusError::config(
                no,
                format!("expected key '{key}', found '{found}'"),
            ));
        }
        Ok((no, value))
    }

    fn expect_end(&mut self) -> Result<()> {
        for (i, line) in self.inner.by_ref() {
            if !line.trim().is_empty() {
                return Err(BioemusError::config(i + 1, "unexpected trailing content"));
            }
        }
        Ok(())
    }
}

fn parse_float(line: usize, token: &str) -> Result<f32> {
    let token = token.trim();
    token
        .parse::<f32>()
        .map_err(|e| BioemusError::config(line, format!("invalid number '{token}': {e}")))
}

fn parse_floats<const N: usize>(line: usize, value: &str, sep: char) -> Result<[f32; N]> {
    let mut out = [0.0f32; N];
    let mut count = 0;
    for token in value.split(sep) {
        if count < N {
            out[count] = parse_float(line, token)?;
        }
        count += 1;
    }
    if count != N {
        return Err(BioemusError::config(
            line,
            format!("expected {N} fields, found {count}"),
        ));
    }
    Ok(out)
}

fn parse_synapse(line: usize, token: &str) -> Result<Synapse> {
    let (kind, weight) = token.split_once(SYN_SEP).ok_or_else(|| {
        BioemusError::config(line, format!("synapse '{}' is not type{SYN_SEP}weight", token.trim()))
    })?;
    Ok(Synapse {
        kind: SynapseType::from_name(kind.trim()),
        weight: parse_float(line, weight)?,
    })
}
