//! Signed Q(I.F) fixed-point codec.
//!
//! Every numeric hardware register holds a two's-complement value with `I`
//! integer bits and `F` fraction bits. `I` may be negative for parameters
//! whose magnitude is well below one (GABAb K3/K4), as long as `I + F` is
//! a valid width in `1..=32`.
//!
//! Encoding scales by `2^F`, truncates toward zero and wraps to 32 bits.
//! Out-of-range values wrap silently, matching what the fabric does with
//! the truncated word. Decoding keeps the low `I + F` bits and sign-extends
//! from bit `I + F - 1`.

/// A fixed-point format `Q(int_bits.frac_bits)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QFormat {
    /// Integer bits (sign bit included). May be negative.
    pub int_bits: i8,
    /// Fraction bits.
    pub frac_bits: u8,
}

impl QFormat {
    /// Build a format. Panics in const context if the width is not in
    /// `1..=32`.
    #[must_use]
    pub const fn new(int_bits: i8, frac_bits: u8) -> Self {
        let width = int_bits as i16 + frac_bits as i16;
        assert!(width >= 1 && width <= 32, "Q(I.F) width must be in 1..=32");
        assert!(frac_bits < 32, "fraction bits must be < 32");
        Self {
            int_bits,
            frac_bits,
        }
    }

    /// Total significant width `I + F`.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn width(self) -> u32 {
        (self.int_bits as i16 + self.frac_bits as i16) as u32
    }

    /// One quantization step, `2^-F`.
    #[must_use]
    pub fn step(self) -> f64 {
        1.0 / self.scale()
    }

    fn scale(self) -> f64 {
        f64::from(1u32 << self.frac_bits)
    }

    /// Encode `value` into a raw register word.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(self, value: f32) -> i32 {
        let scaled = (f64::from(value) * self.scale()).trunc();
        // i64 holds every in-range product; the final cast wraps to 32 bits
        (scaled as i64) as i32
    }

    /// Encode and reinterpret as the unsigned register word.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn encode_word(self, value: f32) -> u32 {
        self.encode(value) as u32
    }

    /// Decode a raw register word.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn decode(self, raw: i32) -> f32 {
        let width = self.width();
        let value = if width >= 32 {
            raw
        } else {
            // shift the sign bit to bit 31 then arithmetic-shift back
            let shift = 32 - width;
            (raw << shift) >> shift
        };
        (f64::from(value) / self.scale()) as f32
    }

    /// Decode an unsigned register word.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn decode_word(self, raw: u32) -> f32 {
        self.decode(raw as i32)
    }
}

impl std::fmt::Display for QFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Q({}.{})", self.int_bits, self.frac_bits)
    }
}

// ── Reference widths ─────────────────────────────────────────────────────────

/// Conductances.
pub const G: QFormat = QFormat::new(4, 23);
/// Reversal potentials.
pub const E: QFormat = QFormat::new(9, 23);
/// Membrane voltage.
pub const V: QFormat = QFormat::new(9, 23);
/// Currents.
pub const CUR: QFormat = QFormat::new(9, 23);
/// Ion gating variables.
pub const ION: QFormat = QFormat::new(2, 25);
/// Truncated voltage (synapse side).
pub const V_TRUNC: QFormat = QFormat::new(8, 10);
/// Truncated current.
pub const CUR_TRUNC: QFormat = QFormat::new(8, 10);
/// Noise offset.
pub const MU: QFormat = QFormat::new(8, 10);
/// Noise θ multiplier.
pub const THETA: QFormat = QFormat::new(2, 16);
/// Noise σ multiplier.
pub const SIGMA: QFormat = QFormat::new(2, 16);
/// Synapse K1 rate constant.
pub const K1_SYN: QFormat = QFormat::new(4, 14);
/// Synapse K2 rate constant.
pub const K2_SYN: QFormat = QFormat::new(1, 16);
/// GABAb K3.
pub const GABAB_K3: QFormat = QFormat::new(-6, 24);
/// GABAb K4.
pub const GABAB_K4: QFormat = QFormat::new(-8, 26);
/// Bv synapse rate table.
pub const BRATE_SYN: QFormat = QFormat::new(2, 10);
/// Tv synapse rate table.
pub const TRATE_SYN: QFormat = QFormat::new(2, 16);
/// Synaptic weight.
pub const WSYN: QFormat = QFormat::new(2, 12);
/// Synaptic conductance.
pub const GSYN: QFormat = QFormat::new(2, 16);
/// Synaptic reversal potential.
pub const ESYN: QFormat = QFormat::new(8, 10);
/// Generic synapse parameter.
pub const SYN: QFormat = QFormat::new(2, 16);
/// GABAb sigmoid input.
pub const SN_GABAB_IN: QFormat = QFormat::new(4, 14);
/// GABAb sigmoid output.
pub const SN_GABAB_OUT: QFormat = QFormat::new(2, 16);
/// Per-neuron synaptic conductance multiplier.
pub const PMUL_GSYN: QFormat = QFormat::new(2, 16);
