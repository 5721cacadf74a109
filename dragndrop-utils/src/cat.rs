use std::io::{self, Write};

use dragndrop::Filename;

use super::Error;
use crate::probe::{self, SimSession};

pub fn cat(session: &mut SimSession, name: &str, hex: bool) -> Result<(), Error> {
    let filename = Filename::parse(name).ok_or_else(|| Error::InvalidName(name.into()))?;
    let file = session.volume().find(&filename).ok_or_else(|| Error::NotFound(name.into()))?;
    let entry = session.volume().entry(file);
    let bytes = probe::read_sectors(session, &entry);
    let mut stdout = io::stdout();
    match hex {
        true => writeln!(stdout, "{}", pretty_hex::pretty_hex(&bytes))?,
        false => stdout.write_all(&bytes)?,
    }
    Ok(())
}
