use scursor::WriteCursor;

use crate::error::InternalError;

pub(crate) trait Serialize {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), InternalError>;
}

pub(crate) trait Parse: Sized {
    fn parse(cursor: &mut scursor::ReadCursor) -> Result<Self, crate::error::AduParseError>;
}
