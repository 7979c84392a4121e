mod context;
pub mod error;
pub mod server;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtmpConnType {
    Play,
    FmlePublish,
    FlashPublish,
    HaivisionPublish,
    Unknow,
}

impl RtmpConnType {
    pub fn is_publish(&self) -> bool {
        matches!(
            self,
            RtmpConnType::FmlePublish | RtmpConnType::FlashPublish | RtmpConnType::HaivisionPublish
        )
    }

    pub fn is_play(&self) -> bool {
        matches!(self, RtmpConnType::Play)
    }
}

pub enum RtmpCtrlAction {
    // From publisher
    Republish,
    // From player
    Pause(bool),
    // From player
    Close,
}
