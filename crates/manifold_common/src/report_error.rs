use std::io;

pub trait Reportable {
    fn report(&self, dest: &mut impl io::Write) -> io::Result<()>;

    fn exit_status(&self) -> i32;
}
