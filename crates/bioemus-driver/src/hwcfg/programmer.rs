//! Configuration upload through the handshake protocol

use super::parser::{HwConfig, SynapseMatrix};
use crate::backend::RegisterAccess;
use crate::error::{BioemusError, Result};
use crate::handshake::{await_value, HandshakePolicy, RowTarget, WriteEnable, WriteProtocol};
use bioemus_hw::params::{
    psyn_format, synapse_entry, HhParam, IONRATE_ENCODING, IONRATE_FIELDS, PSYN_COUNT,
    SYNRATE_ENCODING, SYNRATE_FIELDS, V_INIT_SYN,
};
use bioemus_hw::regs::{self, psyn, setup_syn};
use bioemus_hw::synram::{locate, SynRamImage};
use bioemus_hw::HwGeometry;
use rand::Rng;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Upper bound (inclusive) of a noise generator seed.
pub const MAX_SEED: u32 = 4096;

const HH_ROW: RowTarget<'static> = RowTarget {
    address_registers: &[regs::WADDR_HHPARAM],
    enables: &[WriteEnable {
        register: regs::WEN_HHPARAM,
        mask: 1,
    }],
    ack_register: regs::WADDR_HHPARAM_LP,
};

const SYNRATE_ROW: RowTarget<'static> = RowTarget {
    address_registers: &[
        regs::WADDR_SYNRATE_BV,
        regs::WADDR_SYNRATE_TV,
        regs::WADDR_SN_GABAB,
    ],
    enables: &[WriteEnable {
        register: regs::SETUP_SYN,
        mask: setup_syn::WEN_ALL,
    }],
    ack_register: regs::WADDR_SYNRATE_TV_LP,
};

const ION_RATE_REGS: [u16; IONRATE_FIELDS] =
    [regs::RATE1_M, regs::RATE2_M, regs::RATE1_H, regs::RATE2_H];

const SYNRATE_REGS: [u16; SYNRATE_FIELDS] = [regs::SYNRATE_BV, regs::SYNRATE_TV, regs::SN_GABAB];

/// Noise generator seeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoiseSeeds {
    /// Fresh random seeds for every run.
    #[default]
    Random,
    /// Fixed seeds for reproducible runs.
    Fixed,
}

/// Uploads a [`HwConfig`] into the emulation core.
#[derive(Debug)]
pub struct ConfigProgrammer {
    geometry: HwGeometry,
    protocol: WriteProtocol,
}

impl ConfigProgrammer {
    /// Programmer for `geometry` with the given handshake bounds.
    #[must_use]
    pub fn new(geometry: HwGeometry, policy: HandshakePolicy) -> Self {
        Self {
            geometry,
            protocol: WriteProtocol::new(policy),
        }
    }

    /// Hardware geometry in use.
    #[must_use]
    pub const fn geometry(&self) -> &HwGeometry {
        &self.geometry
    }

    /// Seed the four noise generators.
    ///
    /// # Errors
    ///
    /// Propagates register access errors.
    pub fn set_noise_seeds<R: RegisterAccess + ?Sized>(
        &mut self,
        regs: &mut R,
        mode: NoiseSeeds,
    ) -> Result<[u32; 4]> {
        let seeds = match mode {
            NoiseSeeds::Fixed => [MAX_SEED / 2, MAX_SEED / 4, MAX_SEED / 8, MAX_SEED / 16],
            NoiseSeeds::Random => {
                let mut rng = rand::thread_rng();
                [(); 4].map(|()| rng.gen_range(0..=MAX_SEED))
            }
        };
        for (reg, seed) in (regs::NOISE_SEED_BASE..).zip(seeds) {
            regs.write_raw(reg, seed)?;
        }
        info!("Set noise generator seeds {seeds:?}");
        Ok(seeds)
    }

    /// Load `path` and upload it. The whole file is validated before the
    /// first register write.
    ///
    /// # Errors
    ///
    /// Configuration, I/O and handshake errors.
    pub fn apply<R: RegisterAccess + ?Sized>(&mut self, regs: &mut R, path: impl AsRef<Path>) -> Result<()> {
        let config = HwConfig::load(path, &self.geometry)?;
        for line in &config.header {
            info!("{line}");
        }
        self.upload(regs, &config)
    }

    /// Upload every table of a parsed configuration, in file order.
    ///
    /// # Errors
    ///
    /// Dimension mismatches and handshake errors.
    pub fn upload<R: RegisterAccess + ?Sized>(&mut self, regs: &mut R, config: &HwConfig) -> Result<()> {
        let start = Instant::now();
        self.upload_hh(regs, &config.hh_params)?;
        info!("Apply HH parameters configuration to hardware");
        self.upload_psyn(regs, &config.psyn)?;
        info!("Apply synaptic parameters to hardware");
        self.upload_ionrates(regs, &config.ionrates)?;
        info!("Apply ionrates tables configuration to hardware");
        self.upload_synrates(regs, &config.synrates)?;
        info!("Apply synrates tables configuration to hardware");
        self.upload_synram(regs, &config.synapses)?;
        info!("Apply synaptic configuration to hardware ({:?})", start.elapsed());
        Ok(())
    }

    /// One HH row per neuron.
    ///
    /// # Errors
    ///
    /// Wrong row count or handshake timeout.
    pub fn upload_hh<R: RegisterAccess + ?Sized>(
        &mut self,
        regs: &mut R,
        rows: &[[f32; HhParam::COUNT]],
    ) -> Result<()> {
        check_len("HH parameter rows", rows.len(), self.geometry.neurons as usize)?;
        for (addr, row) in (0u32..).zip(rows) {
            for p in HhParam::ALL {
                let value = row[p as usize];
                regs.write_raw(regs::HHPARAM_BASE + p.offset(), p.encoding().encode(value))?;
                if p == HhParam::VInit {
                    regs.write_raw(regs::V_INIT_SYN_SFI, V_INIT_SYN.encode(value))?;
                }
            }
            self.protocol.write_row(regs, &HH_ROW, addr)?;
        }
        debug!("{} HH rows written", rows.len());
        Ok(())
    }

    /// Synapse-type parameters, one handshake per field. The field index
    /// doubles as the acknowledged address.
    ///
    /// # Errors
    ///
    /// Handshake timeout.
    pub fn upload_psyn<R: RegisterAccess + ?Sized>(
        &mut self,
        regs: &mut R,
        values: &[f32; PSYN_COUNT],
    ) -> Result<()> {
        let policy = self.protocol.policy();
        for (field, &value) in (0u8..).zip(values) {
            let word = psyn::pack(field, psyn_format(usize::from(field)).encode(value));
            regs.write_raw(regs::SETUP_PSYN, word | psyn::WEN)?;
            let waited = await_value(&*regs, regs::WADDR_SETUP_PSYN_LP, u32::from(field), policy);
            regs.write_raw(regs::SETUP_PSYN, word)?;
            waited?;
        }
        debug!("{PSYN_COUNT} synapse parameters written");
        Ok(())
    }

    /// Ion-rate tables; table `i` is selected by enable bit `i`.
    ///
    /// # Errors
    ///
    /// Wrong table shape or handshake timeout.
    pub fn upload_ionrates<R: RegisterAccess + ?Sized>(
        &mut self,
        regs: &mut R,
        tables: &[Vec<[f32; IONRATE_FIELDS]>],
    ) -> Result<()> {
        check_len("ion rate tables", tables.len(), self.geometry.ionrate_count as usize)?;
        for (i, table) in tables.iter().enumerate() {
            check_len("ion rate rows", table.len(), self.geometry.ionrate_depth as usize)?;
            let enables = [
                WriteEnable {
                    register: regs::WEN_IONRATE_M,
                    mask: 1 << i,
                },
                WriteEnable {
                    register: regs::WEN_IONRATE_H,
                    mask: 1 << i,
                },
            ];
            let target = RowTarget {
                address_registers: &[regs::WADDR_IONRATE],
                enables: &enables,
                ack_register: regs::WADDR_IONRATE_LP,
            };
            for (addr, row) in (0u32..).zip(table) {
                for (&reg, &value) in ION_RATE_REGS.iter().zip(row) {
                    regs.write_raw(reg, IONRATE_ENCODING.encode(value))?;
                }
                self.protocol.write_row(regs, &target, addr)?;
            }
            debug!("Ion rate table {i} written");
        }
        Ok(())
    }

    /// Synapse-rate table; the three columns are enabled together.
    ///
    /// # Errors
    ///
    /// Wrong row count or handshake timeout.
    pub fn upload_synrates<R: RegisterAccess + ?Sized>(
        &mut self,
        regs: &mut R,
        rows: &[[f32; SYNRATE_FIELDS]],
    ) -> Result<()> {
        check_len("synapse rate rows", rows.len(), self.geometry.synrate_depth as usize)?;
        for (addr, row) in (0u32..).zip(rows) {
            for ((&reg, enc), &value) in SYNRATE_REGS.iter().zip(SYNRATE_ENCODING).zip(row) {
                regs.write_raw(reg, enc.encode(value))?;
            }
            self.protocol.write_row(regs, &SYNRATE_ROW, addr)?;
        }
        debug!("{} synapse rate rows written", rows.len());
        Ok(())
    }

    /// Pack the connectivity matrix into the synaptic RAM image and write
    /// every bank of every row, then release the synapses.
    ///
    /// # Errors
    ///
    /// Matrix size mismatch or handshake timeout.
    pub fn upload_synram<R: RegisterAccess + ?Sized>(
        &mut self,
        regs: &mut R,
        matrix: &SynapseMatrix,
    ) -> Result<()> {
        let image = self.pack_synram(matrix)?;
        let g = *image.geometry();
        for address in 0..g.depth {
            for bank in 0..g.banks {
                let [w0, w1, w2] = image.bank_words(address, bank);
                regs.write_raw(regs::TWSYN[2], w2)?;
                regs.write_raw(regs::TWSYN[1], w1)?;
                regs.write_raw(regs::TWSYN[0], w0)?;
                let enable = if bank < 32 {
                    WriteEnable {
                        register: regs::WEN_TWSYN_LSB,
                        mask: 1 << bank,
                    }
                } else {
                    WriteEnable {
                        register: regs::WEN_TWSYN_MSB,
                        mask: 1 << (bank - 32),
                    }
                };
                let target = RowTarget {
                    address_registers: &[regs::WADDR_TWSYN],
                    enables: &[enable],
                    ack_register: regs::WADDR_TWSYN_LP,
                };
                self.protocol.write_row(regs, &target, address)?;
            }
        }
        regs.write_raw(regs::INH_TSYN, 0)?;
        debug!("Synaptic RAM written: {} rows × {} banks", g.depth, g.banks);
        Ok(())
    }

    /// Synaptic RAM image of `matrix`.
    ///
    /// # Errors
    ///
    /// [`BioemusError::InvalidArgument`] if the matrix does not match the
    /// geometry.
    pub fn pack_synram(&self, matrix: &SynapseMatrix) -> Result<SynRamImage> {
        let n = self.geometry.neurons;
        check_len("synapse matrix size", matrix.neurons() as usize, n as usize)?;
        let mut image = SynRamImage::new(self.geometry.synram);
        for (src, dest, syn) in matrix.iter() {
            let slot = locate(src, dest, n, &self.geometry.synram);
            image.set(slot, synapse_entry(syn.kind, syn.weight));
        }
        Ok(image)
    }
}

fn check_len(what: &str, found: usize, expected: usize) -> Result<()> {
    if found == expected {
        Ok(())
    } else {
        Err(BioemusError::invalid_argument(format!(
            "{what}: expected {expected}, got {found}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::SimRegisterFile;
    use crate::hwcfg::parser::tests::{sample_config, tiny_geometry};
    use bioemus_hw::params::SynapseType;
    use bioemus_hw::{fixed, synram};

    fn setup() -> (HwGeometry, HwConfig, SimRegisterFile, ConfigProgrammer) {
        let g = tiny_geometry();
        let cfg = HwConfig::parse(&sample_config(&g), &g).unwrap();
        (g, cfg, SimRegisterFile::new().with_journal(), ConfigProgrammer::new(g, HandshakePolicy::default()))
    }

    #[test]
    fn fixed_seeds() {
        let (_, _, mut sim, mut prog) = setup();
        let seeds = prog.set_noise_seeds(&mut sim, NoiseSeeds::Fixed).unwrap();
        assert_eq!(seeds, [2048, 1024, 512, 256]);
        assert_eq!(sim.value(regs::NOISE_SEED_BASE + 3), 256);
        let random = prog.set_noise_seeds(&mut sim, NoiseSeeds::Random).unwrap();
        assert!(random.iter().all(|&s| s <= MAX_SEED));
    }

    #[test]
    fn hh_rows_carry_encoded_fields() {
        let (g, cfg, mut sim, mut prog) = setup();
        prog.upload_hh(&mut sim, &cfg.hh_params).unwrap();
        let rows = sim.acceptances();
        assert_eq!(rows.len(), g.neurons as usize);

        let row = &rows[5];
        assert_eq!(row.address, 5);
        let word = |p: HhParam| row.snapshot[usize::from(regs::HHPARAM_BASE + p.offset())];
        let value = |p: HhParam| cfg.hh_params[5][p as usize];
        assert_eq!(word(HhParam::GNa), 5.0f32.to_bits());
        assert_eq!(word(HhParam::ECa), value(HhParam::ECa).to_bits());
        assert_eq!(word(HhParam::IStim), fixed::CUR.encode_word(value(HhParam::IStim)));
        assert_eq!(word(HhParam::NoiseOffset), fixed::MU.encode_word(value(HhParam::NoiseOffset)));
        assert_eq!(
            row.snapshot[usize::from(regs::V_INIT_SYN_SFI)],
            fixed::V_TRUNC.encode_word(value(HhParam::VInit))
        );
        assert_eq!(sim.value(regs::WEN_HHPARAM), 0);
    }

    #[test]
    fn psyn_fields_acknowledged_by_index() {
        let (_, cfg, mut sim, mut prog) = setup();
        prog.upload_psyn(&mut sim, &cfg.psyn).unwrap();
        let rows = sim.acceptances();
        assert_eq!(rows.len(), PSYN_COUNT);
        for (k, row) in rows.iter().enumerate() {
            assert_eq!(row.address as usize, k);
            let word = row.snapshot[usize::from(regs::SETUP_PSYN)];
            let expected = psyn::pack(k as u8, psyn_format(k).encode(cfg.psyn[k])) | psyn::WEN;
            assert_eq!(word, expected);
        }
        assert_eq!(sim.value(regs::SETUP_PSYN) & psyn::WEN, 0);
    }

    #[test]
    fn ionrate_tables_select_by_bit() {
        let (g, cfg, mut sim, mut prog) = setup();
        prog.upload_ionrates(&mut sim, &cfg.ionrates).unwrap();
        let rows = sim.acceptances();
        assert_eq!(rows.len(), (g.ionrate_count * g.ionrate_depth) as usize);
        let last = rows.last().unwrap();
        assert_eq!(last.address, 2);
        assert_eq!(last.snapshot[usize::from(regs::WEN_IONRATE_M)], 1 << 1);
        assert_eq!(last.snapshot[usize::from(regs::WEN_IONRATE_H)], 1 << 1);
        assert_eq!(last.snapshot[usize::from(regs::RATE2_M)], 2.0f32.to_bits());
        assert_eq!(sim.value(regs::WEN_IONRATE_H), 0);
    }

    #[test]
    fn synrate_rows_write_all_addresses() {
        let (g, cfg, mut sim, mut prog) = setup();
        prog.upload_synrates(&mut sim, &cfg.synrates).unwrap();
        let rows = sim.acceptances();
        assert_eq!(rows.len(), g.synrate_depth as usize);
        let row = &rows[3];
        for reg in [regs::WADDR_SYNRATE_BV, regs::WADDR_SYNRATE_TV, regs::WADDR_SN_GABAB] {
            assert_eq!(row.snapshot[usize::from(reg)], 3);
        }
        assert_eq!(row.snapshot[usize::from(regs::SETUP_SYN)], setup_syn::WEN_ALL);
        assert_eq!(
            row.snapshot[usize::from(regs::SN_GABAB)],
            fixed::SN_GABAB_OUT.encode_word(3.0)
        );
        assert_eq!(sim.value(regs::SETUP_SYN), 0);
    }

    #[test]
    fn synram_upload_places_entries() {
        let (g, cfg, mut sim, mut prog) = setup();
        sim.write_raw(regs::INH_TSYN, 1).unwrap();
        prog.upload_synram(&mut sim, &cfg.synapses).unwrap();

        let s = &g.synram;
        let rows = sim.acceptances();
        assert_eq!(rows.len(), (s.depth * u32::from(s.banks)) as usize);
        assert_eq!(sim.value(regs::INH_TSYN), 0);

        // neuron 0 → neuron 1 is the only non-zero synapse
        let slot = synram::locate(0, 1, g.neurons, s);
        let entry = synapse_entry(SynapseType::GabaB, 0.5);
        let bank = slot.bank(s);
        let row = &rows[(slot.address * u32::from(s.banks) + u32::from(bank)) as usize];
        assert_eq!(row.address, slot.address);
        let image = prog.pack_synram(&cfg.synapses).unwrap();
        assert_eq!(image.get(slot), entry);
        let words = image.bank_words(slot.address, bank);
        assert_eq!(row.snapshot[usize::from(regs::TWSYN[0])], words[0]);
        assert_eq!(row.snapshot[usize::from(regs::TWSYN[1])], words[1]);
        assert_eq!(row.snapshot[usize::from(regs::TWSYN[2])], words[2]);
        assert_ne!(words, [0; 3]);
        let enable_reg = if bank < 32 { regs::WEN_TWSYN_LSB } else { regs::WEN_TWSYN_MSB };
        assert_eq!(row.snapshot[usize::from(enable_reg)], 1 << (bank % 32));
    }

    #[test]
    fn apply_uploads_in_file_order() {
        let (g, _, mut sim, mut prog) = setup();
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), sample_config(&g)).unwrap();
        prog.apply(&mut sim, file.path()).unwrap();

        let order: Vec<u16> = sim.acceptances().iter().map(|a| a.enable_register).collect();
        let mut firsts = order.clone();
        firsts.dedup();
        assert_eq!(
            firsts,
            vec![
                regs::WEN_HHPARAM,
                regs::SETUP_PSYN,
                regs::WEN_IONRATE_M,
                regs::SETUP_SYN,
                regs::WEN_TWSYN_LSB
            ]
        );
    }

    #[test]
    fn malformed_file_writes_nothing() {
        let (g, _, mut sim, mut prog) = setup();
        let file = tempfile::NamedTempFile::new().unwrap();
        let text = sample_config(&g).replacen("synrates_A2=0.5", "synrates_A2=?", 1);
        std::fs::write(file.path(), text).unwrap();
        assert!(matches!(
            prog.apply(&mut sim, file.path()),
            Err(BioemusError::Config { .. })
        ));
        assert!(sim.writes().is_empty());
    }

    #[test]
    fn wrong_dimensions_rejected() {
        let (_, cfg, mut sim, mut prog) = setup();
        assert!(prog.upload_hh(&mut sim, &cfg.hh_params[..4]).is_err());
        assert!(prog.upload_synrates(&mut sim, &cfg.synrates[..1]).is_err());
        assert!(sim.writes().is_empty());
    }
}
