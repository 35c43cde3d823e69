//! Parameter field tables and their register encodings.
//!
//! The fixed-point width of each uploaded field is a property of the fabric
//! build. A mismatched width silently corrupts the loaded value, so the
//! lookups here are the single source for every encoder.

use crate::fixed::{self, QFormat};

/// How a parameter value is turned into a register word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldEncoding {
    /// IEEE-754 single-precision bit pattern.
    Float32,
    /// Signed fixed point.
    Fixed(QFormat),
}

impl FieldEncoding {
    /// Encode `value` as a register word.
    #[must_use]
    pub fn encode(self, value: f32) -> u32 {
        match self {
            Self::Float32 => value.to_bits(),
            Self::Fixed(q) => q.encode_word(value),
        }
    }

    /// Decode a register word back to a value.
    #[must_use]
    pub fn decode(self, word: u32) -> f32 {
        match self {
            Self::Float32 => f32::from_bits(word),
            Self::Fixed(q) => q.decode_word(word),
        }
    }
}

// ── HH parameters ────────────────────────────────────────────────────────────

/// Per-neuron Hodgkin-Huxley parameter vector, in register order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum HhParam {
    /// Sodium conductance.
    GNa = 0,
    /// Delayed-rectifier potassium conductance.
    GKd,
    /// M-current conductance.
    GM,
    /// L-type calcium conductance.
    GL,
    /// T-type calcium conductance.
    GT,
    /// Leak conductance.
    GLeak,
    /// Sodium reversal potential.
    ENa,
    /// Potassium reversal potential.
    EK,
    /// Calcium reversal potential.
    ECa,
    /// Leak reversal potential.
    ELeak,
    /// Noise offset.
    NoiseOffset,
    /// Noise θ multiplier.
    Theta,
    /// Noise σ multiplier.
    Sigma,
    /// Constant stimulation current.
    IStim,
    /// Initial membrane voltage.
    VInit,
    /// Synaptic conductance multiplier.
    GsynMultiplier,
}

impl HhParam {
    /// Number of fields per neuron.
    pub const COUNT: usize = 16;

    /// All fields in register order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::GNa,
        Self::GKd,
        Self::GM,
        Self::GL,
        Self::GT,
        Self::GLeak,
        Self::ENa,
        Self::EK,
        Self::ECa,
        Self::ELeak,
        Self::NoiseOffset,
        Self::Theta,
        Self::Sigma,
        Self::IStim,
        Self::VInit,
        Self::GsynMultiplier,
    ];

    /// Offset from the HH staging base register.
    #[must_use]
    pub const fn offset(self) -> u16 {
        self as u16
    }

    /// Register encoding of this field.
    #[must_use]
    pub const fn encoding(self) -> FieldEncoding {
        match self {
            Self::NoiseOffset => FieldEncoding::Fixed(fixed::MU),
            Self::Theta => FieldEncoding::Fixed(fixed::THETA),
            Self::Sigma => FieldEncoding::Fixed(fixed::SIGMA),
            Self::GsynMultiplier => FieldEncoding::Fixed(fixed::PMUL_GSYN),
            Self::IStim => FieldEncoding::Fixed(fixed::CUR),
            _ => FieldEncoding::Float32,
        }
    }
}

/// Encoding of the synapse-side copy of `VInit`.
pub const V_INIT_SYN: FieldEncoding = FieldEncoding::Fixed(fixed::V_TRUNC);

// ── Ion and synapse rate tables ──────────────────────────────────────────────

/// Columns of one ion-rate row (m rate 1, m rate 2, h rate 1, h rate 2).
pub const IONRATE_FIELDS: usize = 4;
/// Ion rates are uploaded as raw IEEE-754 words.
pub const IONRATE_ENCODING: FieldEncoding = FieldEncoding::Float32;

/// Columns of one synapse-rate row (Bv, Tv, SN GABAb).
pub const SYNRATE_FIELDS: usize = 3;
/// Encodings of the synapse-rate columns.
pub const SYNRATE_ENCODING: [FieldEncoding; SYNRATE_FIELDS] = [
    FieldEncoding::Fixed(fixed::BRATE_SYN),
    FieldEncoding::Fixed(fixed::TRATE_SYN),
    FieldEncoding::Fixed(fixed::SN_GABAB_OUT),
];

// ── Synapse types ────────────────────────────────────────────────────────────

/// Receptor type of a synapse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum SynapseType {
    /// AMPA (also the fallback for unknown names).
    #[default]
    Ampa = 0,
    /// NMDA.
    Nmda = 1,
    /// GABAa.
    GabaA = 2,
    /// GABAb.
    GabaB = 3,
}

impl SynapseType {
    /// Parse a type name from the matrix section. Matching is
    /// case-insensitive; placeholders such as `x` fall back to AMPA.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "nmda" => Self::Nmda,
            "gabaa" => Self::GabaA,
            "gabab" => Self::GabaB,
            _ => Self::Ampa,
        }
    }

    /// Hardware type id.
    #[must_use]
    pub const fn id(self) -> u8 {
        self as u8
    }
}

/// Bits of a synaptic RAM entry holding the encoded weight.
pub const WEIGHT_BITS: u32 = 14;
/// Width of one synaptic RAM entry.
pub const ENTRY_BITS: u32 = 16;

/// Pack a synapse type and weight into a 16-bit RAM entry.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn synapse_entry(kind: SynapseType, weight: f32) -> u16 {
    let w = (fixed::WSYN.encode(weight) as u32) & ((1 << WEIGHT_BITS) - 1);
    ((u32::from(kind.id()) << WEIGHT_BITS) | w) as u16
}

// ── Synapse-type parameters ──────────────────────────────────────────────────

/// Number of synapse-type parameter fields.
pub const PSYN_COUNT: usize = 18;

/// Role of a synapse-type parameter field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsynRole {
    /// First rate constant.
    K1,
    /// Second rate constant.
    K2,
    /// GABAb third rate constant.
    K3,
    /// GABAb fourth rate constant.
    K4,
    /// Maximal conductance.
    Gsyn,
    /// Reversal potential.
    Esyn,
}

/// Field layout: AMPA, NMDA, GABAa each `K1, K2, gsyn, Esyn`, then GABAb
/// `K1, K2, K3, K4, gsyn, Esyn`.
pub const PSYN_LAYOUT: [(SynapseType, PsynRole); PSYN_COUNT] = [
    (SynapseType::Ampa, PsynRole::K1),
    (SynapseType::Ampa, PsynRole::K2),
    (SynapseType::Ampa, PsynRole::Gsyn),
    (SynapseType::Ampa, PsynRole::Esyn),
    (SynapseType::Nmda, PsynRole::K1),
    (SynapseType::Nmda, PsynRole::K2),
    (SynapseType::Nmda, PsynRole::Gsyn),
    (SynapseType::Nmda, PsynRole::Esyn),
    (SynapseType::GabaA, PsynRole::K1),
    (SynapseType::GabaA, PsynRole::K2),
    (SynapseType::GabaA, PsynRole::Gsyn),
    (SynapseType::GabaA, PsynRole::Esyn),
    (SynapseType::GabaB, PsynRole::K1),
    (SynapseType::GabaB, PsynRole::K2),
    (SynapseType::GabaB, PsynRole::K3),
    (SynapseType::GabaB, PsynRole::K4),
    (SynapseType::GabaB, PsynRole::Gsyn),
    (SynapseType::GabaB, PsynRole::Esyn),
];

impl PsynRole {
    /// Fixed-point format of this role.
    ///
    /// Reversal potentials share the truncated-voltage format of the
    /// synapse datapath.
    #[must_use]
    pub const fn format(self) -> QFormat {
        match self {
            Self::K1 => fixed::K1_SYN,
            Self::K2 => fixed::K2_SYN,
            Self::K3 => fixed::GABAB_K3,
            Self::K4 => fixed::GABAB_K4,
            Self::Gsyn => fixed::GSYN,
            Self::Esyn => fixed::V_TRUNC,
        }
    }
}

/// Fixed-point format of synapse-type parameter `field`. Indices outside
/// the layout use the generic synapse format.
#[must_use]
pub fn psyn_format(field: usize) -> QFormat {
    PSYN_LAYOUT
        .get(field)
        .map_or(fixed::SYN, |(_, role)| role.format())
}
