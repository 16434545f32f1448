use std::fmt;

/// One participant on the radio network. The callsign set is closed: frames
/// from anything else are rejected at the codec layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Station {
    Balloon,
    GroundStation,
    Chase1,
    Chase2,
    Chase3,
}

impl Station {
    pub const ALL: [Station; 5] = [
        Station::Balloon,
        Station::GroundStation,
        Station::Chase1,
        Station::Chase2,
        Station::Chase3,
    ];

    pub fn from_callsign(callsign: &str) -> Option<Self> {
        match callsign {
            "hab" => Some(Station::Balloon),
            "nps" => Some(Station::GroundStation),
            "chase1" => Some(Station::Chase1),
            "chase2" => Some(Station::Chase2),
            "chase3" => Some(Station::Chase3),
            _ => None,
        }
    }

    pub fn callsign(&self) -> &'static str {
        match self {
            Station::Balloon => "hab",
            Station::GroundStation => "nps",
            Station::Chase1 => "chase1",
            Station::Chase2 => "chase2",
            Station::Chase3 => "chase3",
        }
    }

    /// Operator-facing name, used as the chat prefix.
    pub fn display_name(&self) -> &'static str {
        match self {
            Station::Balloon => "Balloon",
            Station::GroundStation => "NPS",
            Station::Chase1 => "Chase 1",
            Station::Chase2 => "Chase 2",
            Station::Chase3 => "Chase 3",
        }
    }

}

impl fmt::Display for Station {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.callsign())
    }
}
