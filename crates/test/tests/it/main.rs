mod lifecycle;
mod rounds;
mod waits;
