use failure::Fail;

use crate::error::Error;
use crate::gen2::{Bank, LinkFrequency, Session, TagEncoding, Target};
use crate::params::{Param, Region, UserConfigOp};
use crate::read_plan::{SimpleReadPlan, TagOp};
use crate::stats::StatsFlags;
use crate::tag::TagProtocol;
use crate::transport::Transport;
use crate::Reader;

/// A configuration step the reader rejected. Later steps were not sent.
#[derive(Debug, Fail)]
#[fail(display = "setting {}", step)]
pub struct StepError {
    pub step: String,
    #[cause]
    pub cause: Error,
}

fn step_name(param: &Param) -> String {
    match param {
        Param::UserConfig(op) => format!("user configuration option: {}", op),
        other => other.name().to_string(),
    }
}

/// Set each parameter in turn, calling `on_set` after each one the reader
/// accepted, and stop at the first failure.
fn apply<T, F>(reader: &mut Reader<T>, params: &[Param], mut on_set: F) -> Result<(), StepError>
where
    T: Transport,
    F: FnMut(&Param),
{
    for param in params {
        reader.param_set(param).map_err(|cause| StepError {
            step: step_name(param),
            cause,
        })?;
        on_set(param);
    }
    Ok(())
}

/// Radio and protocol settings for an autonomous read, and the read plan the
/// reader runs on its own once they are saved.
#[derive(Clone, PartialEq, Debug)]
pub struct AutonomousConfig {
    pub region: Region,
    pub baud_rate: u32,
    /// Centi-dBm
    pub read_power: u16,
    pub link_frequency: LinkFrequency,
    pub session: Session,
    pub target: Target,
    pub tag_encoding: TagEncoding,
    /// Milliseconds
    pub async_on_time: u32,
    pub unique_by_data: bool,
    pub antennas: Vec<u8>,
    pub weight: u32,
    /// Embedded read: bank, word address, word count
    pub read_data: Option<(Bank, u32, u8)>,
    pub stats: StatsFlags,
}

impl Default for AutonomousConfig {
    fn default() -> AutonomousConfig {
        AutonomousConfig {
            region: Region::Na3,
            baud_rate: 115200,
            read_power: 2700,
            link_frequency: LinkFrequency::Khz250,
            session: Session::S0,
            target: Target::A,
            tag_encoding: TagEncoding::M8,
            async_on_time: 1000,
            unique_by_data: false,
            antennas: vec![1],
            weight: 1000,
            read_data: Some((Bank::Tid, 0x03, 0x03)),
            stats: StatsFlags::empty(),
        }
    }
}

impl AutonomousConfig {
    /// Parameters to apply before the read plan, in order.
    pub fn params(&self) -> Vec<Param> {
        let mut params = vec![
            Param::Region(self.region),
            Param::BaudRate(self.baud_rate),
            Param::ReadPower(self.read_power),
            Param::Gen2LinkFrequency(self.link_frequency),
            Param::Gen2Session(self.session),
            Param::Gen2Target(self.target),
            Param::Gen2TagEncoding(self.tag_encoding),
            Param::AsyncOnTime(self.async_on_time),
            Param::UniqueByData(self.unique_by_data),
        ];
        if !self.stats.is_empty() {
            params.push(Param::StatsEnable(self.stats));
        }
        params
    }

    /// Gen2 plan over the configured antennas with the embedded read, marked
    /// for autonomous reading.
    pub fn read_plan(&self) -> SimpleReadPlan {
        let mut plan = SimpleReadPlan::new(&self.antennas, TagProtocol::Gen2, self.weight);
        if let Some((bank, word_address, len)) = self.read_data {
            plan.set_tag_op(TagOp::Gen2ReadData { bank, word_address, len });
        }
        plan.set_enable_autonomous_read(true);
        plan
    }

    /// Everything the enable path sets: the radio parameters, the read plan,
    /// then save with the plan and restore, which starts the reader.
    pub fn enable_params(&self) -> Vec<Param> {
        let mut params = self.params();
        params.push(Param::ReadPlan(self.read_plan()));
        params.push(Param::UserConfig(UserConfigOp::SaveWithReadPlan));
        params.push(Param::UserConfig(UserConfigOp::Restore));
        params
    }

    /// Configure `reader` for autonomous reading and start it.
    pub fn enable<T, F>(&self, reader: &mut Reader<T>, on_set: F) -> Result<(), StepError>
    where
        T: Transport,
        F: FnMut(&Param),
    {
        apply(reader, &self.enable_params(), on_set)
    }

    /// Clear the saved configuration, which stops autonomous reading.
    pub fn disable<T, F>(reader: &mut Reader<T>, on_set: F) -> Result<(), StepError>
    where
        T: Transport,
        F: FnMut(&Param),
    {
        apply(reader, &[Param::UserConfig(UserConfigOp::Clear)], on_set)
    }
}
