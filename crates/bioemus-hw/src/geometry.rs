//! Hardware build geometry.
//!
//! Neuron count, table depths and the synaptic RAM organisation are fixed
//! when the fabric is synthesised. They are carried as a value instead of
//! constants so a host build can follow a different bitstream, and so tests
//! can run against small geometries.

/// Organisation of the synaptic weight RAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynRamGeometry {
    /// Number of RAM banks written in parallel.
    pub banks: u16,
    /// Rows per bank.
    pub depth: u32,
    /// Bits per bank row.
    pub width_bits: u32,
    /// Parallel multiply lanes reading the banks.
    pub lanes: u32,
}

impl SynRamGeometry {
    /// 64 banks × 4096 rows × 72 bits, 96 lanes.
    pub const REFERENCE: Self = Self {
        banks: 64,
        depth: 4096,
        width_bits: 72,
        lanes: 96,
    };

    /// 16-bit entries each lane owns per row.
    pub const SUBWORDS: u32 = 3;

    /// Bytes per bank row.
    #[must_use]
    pub const fn bank_bytes(&self) -> usize {
        (self.width_bits / 8) as usize
    }

    /// Bytes of one full RAM row across all banks.
    #[must_use]
    pub const fn row_bytes(&self) -> usize {
        self.bank_bytes() * self.banks as usize
    }

    /// 16-bit entries in one RAM row.
    #[must_use]
    pub const fn row_entries(&self) -> usize {
        (self.lanes * Self::SUBWORDS) as usize
    }

    /// Entries needed to hold an `n × n` matrix.
    #[must_use]
    pub const fn rows_needed(&self, neurons: u32) -> u64 {
        let groups = neurons.div_ceil(self.lanes) as u64;
        (groups * neurons as u64).div_ceil(Self::SUBWORDS as u64)
    }

    /// Check internal consistency and capacity for `neurons`.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError`] if the banks and lanes disagree on the row
    /// width, or if the matrix does not fit the RAM depth.
    pub fn validate(&self, neurons: u32) -> Result<(), GeometryError> {
        if self.banks == 0 || self.lanes == 0 || self.depth == 0 {
            return Err(GeometryError::Empty);
        }
        if self.width_bits % 8 != 0 {
            return Err(GeometryError::UnalignedWidth(self.width_bits));
        }
        if self.banks > 64 {
            return Err(GeometryError::TooManyBanks(self.banks));
        }
        let bank_bits = u64::from(self.banks) * u64::from(self.width_bits);
        let lane_bits = u64::from(self.lanes) * u64::from(Self::SUBWORDS) * 16;
        if bank_bits != lane_bits {
            return Err(GeometryError::RowMismatch {
                bank_bits,
                lane_bits,
            });
        }
        let needed = self.rows_needed(neurons);
        if needed > u64::from(self.depth) {
            return Err(GeometryError::MatrixTooLarge {
                neurons,
                needed,
                depth: self.depth,
            });
        }
        Ok(())
    }
}

/// Complete hardware build parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HwGeometry {
    /// Emulated neurons.
    pub neurons: u32,
    /// Number of ion-rate tables.
    pub ionrate_count: u32,
    /// Rows per ion-rate table.
    pub ionrate_depth: u32,
    /// Rows of the synapse-rate tables.
    pub synrate_depth: u32,
    /// Synaptic RAM organisation.
    pub synram: SynRamGeometry,
    /// Emulation time step in milliseconds.
    pub time_step_ms: f64,
}

impl HwGeometry {
    /// Reference ZynqMP build: 1024 neurons.
    pub const REFERENCE: Self = Self {
        neurons: 1024,
        ionrate_count: 5,
        ionrate_depth: 2048,
        synrate_depth: 2048,
        synram: SynRamGeometry::REFERENCE,
        time_step_ms: 0.031_25,
    };

    /// Validate and return the geometry.
    ///
    /// # Errors
    ///
    /// Returns [`GeometryError`] for inconsistent parameters.
    pub fn validated(self) -> Result<Self, GeometryError> {
        if self.neurons == 0 || self.neurons % 32 != 0 {
            return Err(GeometryError::NeuronCount(self.neurons));
        }
        if self.ionrate_count > 32 {
            return Err(GeometryError::TooManyIonTables(self.ionrate_count));
        }
        if self.time_step_ms.is_nan() || self.time_step_ms <= 0.0 {
            return Err(GeometryError::TimeStep);
        }
        self.synram.validate(self.neurons)?;
        Ok(self)
    }

    /// 32-bit spike bitfields per frame.
    #[must_use]
    pub const fn spike_words(&self) -> usize {
        (self.neurons / 32) as usize
    }
}

impl Default for HwGeometry {
    fn default() -> Self {
        Self::REFERENCE
    }
}

/// Inconsistent hardware geometry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeometryError {
    /// A dimension is zero.
    #[error("synaptic RAM has an empty dimension")]
    Empty,
    /// Neuron count is zero or not a multiple of 32.
    #[error("neuron count {0} must be a non-zero multiple of 32")]
    NeuronCount(u32),
    /// More ion-rate tables than write-enable bits.
    #[error("{0} ion-rate tables exceed 32")]
    TooManyIonTables(u32),
    /// Bank row width is not a whole number of bytes.
    #[error("RAM width {0} is not byte aligned")]
    UnalignedWidth(u32),
    /// More banks than write-enable bits.
    #[error("{0} RAM banks exceed 64")]
    TooManyBanks(u16),
    /// Time step is not positive.
    #[error("time step must be positive")]
    TimeStep,
    /// Banks and lanes describe different row widths.
    #[error("bank row is {bank_bits} bits but lanes expect {lane_bits} bits")]
    RowMismatch {
        /// `banks × width`.
        bank_bits: u64,
        /// `lanes × 3 × 16`.
        lane_bits: u64,
    },
    /// The synaptic matrix needs more rows than the RAM holds.
    #[error("{neurons}x{neurons} matrix needs {needed} rows, RAM has {depth}")]
    MatrixTooLarge {
        /// Neuron count.
        neurons: u32,
        /// Rows required.
        needed: u64,
        /// Rows available.
        depth: u32,
    },
}
