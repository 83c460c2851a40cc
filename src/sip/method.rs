//! Request methods. Grounded in `include/sip/base.h`'s `enum class method`
//! and its `operator>>`/`operator<<`, narrowed to the methods a minimal
//! UAS/UAC exchanges in the end-to-end scenario this crate tests against:
//! INVITE, ACK, BYE, CANCEL, REGISTER, OPTIONS. The original's fuller set
//! (UPDATE, INFO, SUBSCRIBE, NOTIFY, REFER, MESSAGE) has no caller here.

use std::fmt;

use crate::error::{Error, Result};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Register,
    Options,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Register => "REGISTER",
            Method::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Method> {
        match s {
            "INVITE" => Ok(Method::Invite),
            "ACK" => Ok(Method::Ack),
            "BYE" => Ok(Method::Bye),
            "CANCEL" => Ok(Method::Cancel),
            "REGISTER" => Ok(Method::Register),
            "OPTIONS" => Ok(Method::Options),
            _ => Err(Error::MalformedMessage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_variant_through_its_wire_text() {
        for m in [Method::Invite, Method::Ack, Method::Bye, Method::Cancel, Method::Register, Method::Options] {
            let parsed: Method = m.as_str().parse().unwrap();
            assert_eq!(parsed, m);
        }
    }

    #[test]
    fn unknown_text_is_a_malformed_message() {
        assert_eq!("FROBNICATE".parse::<Method>(), Err(Error::MalformedMessage));
    }
}
